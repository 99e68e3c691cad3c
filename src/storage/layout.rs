//! On-disk layout: `current/` for in-progress writers, `upload/` for files
//! waiting to be transferred, and a scratch directory for transfer temp data.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use crate::config::AppConfig;
use crate::error::StudyError;
use crate::models::UploadArtifact;

use super::data_store::DataStore;

pub const CURRENT_DIR_NAME: &str = "current";
pub const UPLOAD_DIR_NAME: &str = "upload";

pub type SharedDataStore = Arc<Mutex<DataStore>>;

pub struct StorageLayout {
    current_dir: PathBuf,
    upload_dir: PathBuf,
    temp_dir: PathBuf,
    upload_extensions: Vec<String>,
    stores: Mutex<HashMap<String, SharedDataStore>>,
}

impl StorageLayout {
    pub fn new(root: &Path, config: &AppConfig) -> Self {
        Self {
            current_dir: root.join(CURRENT_DIR_NAME),
            upload_dir: root.join(UPLOAD_DIR_NAME),
            temp_dir: root.join(&config.temp_dir_name),
            upload_extensions: config
                .upload_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn create_directories(&self) -> Result<()> {
        for dir in [&self.current_dir, &self.upload_dir, &self.temp_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Open (or return the already open) store for `data_type`.
    pub fn create_store(&self, category: &str, data_type: &str, headers: &[&str]) -> SharedDataStore {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(data_type.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DataStore::new(
                    category,
                    data_type,
                    headers,
                    &self.current_dir,
                    &self.upload_dir,
                )))
            })
            .clone()
    }

    /// Rotate the store's last file into the upload queue and forget it.
    pub fn close_store(&self, data_type: &str) -> Result<()> {
        let removed = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(data_type);
        if let Some(store) = removed {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .rotate()?;
        }
        Ok(())
    }

    /// Rotate every open store and sweep leftovers from `current/` into
    /// `upload/`. Returns the number of files moved.
    pub fn prepare_for_upload(&self) -> Result<usize> {
        let stores: Vec<SharedDataStore> = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut moved = 0;
        for store in stores {
            let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.rotate() {
                Ok(Some(_)) => moved += 1,
                Ok(None) => {}
                Err(err) => error!("Failed to rotate {} store: {err:?}", guard.data_type()),
            }
        }

        if !self.current_dir.exists() {
            return Ok(moved);
        }
        let entries = fs::read_dir(&self.current_dir)
            .with_context(|| format!("failed to list {}", self.current_dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let target = self.upload_dir.join(entry.file_name());
            match fs::rename(&path, &target) {
                Ok(()) => moved += 1,
                Err(err) => warn!("{}", StudyError::storage_io(&path, err)),
            }
        }

        debug!("prepare_for_upload moved {moved} files");
        Ok(moved)
    }

    pub fn is_upload_file(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.upload_extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Enumerate upload-eligible files with their sizes. Read fresh every call.
    pub async fn list_upload_files(&self) -> Result<Vec<UploadArtifact>> {
        let mut artifacts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
            Err(err) => {
                return Err(StudyError::storage_io(&self.upload_dir, err).into());
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("failed to list {}", self.upload_dir.display()))?
        {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.is_upload_file(&file_name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    warn!("{}", StudyError::storage_io(entry.path(), err));
                    continue;
                }
            };
            artifacts.push(UploadArtifact {
                file_name,
                path: entry.path(),
                size_bytes: metadata.len(),
            });
        }

        Ok(artifacts)
    }

    /// Drop leftover transfer scratch data. Missing directory is fine.
    pub async fn clear_temp(&self) {
        match tokio::fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => debug!("Cleared {}", self.temp_dir.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("{}", StudyError::storage_io(&self.temp_dir, err)),
        }
        if let Err(err) = tokio::fs::create_dir_all(&self.temp_dir).await {
            warn!("{}", StudyError::storage_io(&self.temp_dir, err));
        }
    }

    /// Forget every open store and delete all files in `current/` and
    /// `upload/`.
    pub async fn remove_all_study_files(&self) -> Result<usize> {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let mut removed = 0;
        for dir in [&self.upload_dir, &self.current_dir] {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StudyError::storage_io(dir, err).into()),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("failed to list {}", dir.display()))?
            {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|err| StudyError::storage_io(&path, err))?;
                removed += 1;
            }
        }

        info!("Removed {removed} study files");
        Ok(removed)
    }
}
