//! Append-only CSV writer for one data stream.

use anyhow::{Context, Result};
use chrono::Utc;
use log::debug;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::models::artifact_file_name;

pub const DATA_FILE_EXTENSION: &str = "csv";

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

pub struct DataStore {
    category: String,
    data_type: String,
    headers: Vec<String>,
    current_dir: PathBuf,
    upload_dir: PathBuf,
    file: Option<OpenFile>,
}

impl DataStore {
    pub fn new(
        category: impl Into<String>,
        data_type: impl Into<String>,
        headers: &[&str],
        current_dir: &Path,
        upload_dir: &Path,
    ) -> Self {
        Self {
            category: category.into(),
            data_type: data_type.into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            current_dir: current_dir.to_path_buf(),
            upload_dir: upload_dir.to_path_buf(),
            file: None,
        }
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    /// Name of the file currently being written, if one is open.
    pub fn current_file_name(&self) -> Option<String> {
        self.file
            .as_ref()
            .and_then(|open| open.path.file_name())
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }

    pub fn store(&mut self, row: &[String]) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(self.open_new_file()?);
        }
        if let Some(open) = self.file.as_mut() {
            writeln!(open.writer, "{}", encode_row(row))
                .with_context(|| format!("failed to append to {}", open.path.display()))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(open) = self.file.as_mut() {
            open.writer
                .flush()
                .with_context(|| format!("failed to flush {}", open.path.display()))?;
        }
        Ok(())
    }

    /// Close the current file and move it into the upload directory. The next
    /// `store` starts a fresh file.
    pub fn rotate(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut open) = self.file.take() else {
            return Ok(None);
        };
        open.writer
            .flush()
            .with_context(|| format!("failed to flush {}", open.path.display()))?;
        drop(open.writer);

        let Some(file_name) = open.path.file_name() else {
            return Ok(None);
        };
        let target = self.upload_dir.join(file_name);
        fs::rename(&open.path, &target).with_context(|| {
            format!(
                "failed to move {} to {}",
                open.path.display(),
                target.display()
            )
        })?;
        debug!("Rotated {} into upload queue", target.display());
        Ok(Some(target))
    }

    fn open_new_file(&self) -> Result<OpenFile> {
        let name = artifact_file_name(
            &self.category,
            &self.data_type,
            Utc::now().timestamp_millis(),
            DATA_FILE_EXTENSION,
        );
        let path = self.current_dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self.headers.join(","))
            .with_context(|| format!("failed to write header to {}", path.display()))?;
        Ok(OpenFile { path, writer })
    }
}

fn encode_row(row: &[String]) -> String {
    row.iter()
        .map(|field| {
            if field.contains([',', '"', '\n']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
