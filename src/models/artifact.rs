//! Pending upload files and the `{category}_{type}_{epochMillis}.{ext}`
//! naming scheme they carry.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl UploadArtifact {
    pub fn parsed(&self) -> ParsedFileName {
        ParsedFileName::parse(&self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedFileName {
    pub category: String,
    pub data_type: String,
    /// Embedded epoch millis; 0 when the name does not follow the scheme.
    pub timestamp_ms: i64,
    pub extension: String,
}

impl ParsedFileName {
    pub fn parse(file_name: &str) -> Self {
        let path = Path::new(file_name);
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();

        let pieces: Vec<&str> = stem.split('_').collect();
        if pieces.len() < 3 {
            return Self {
                extension,
                ..Self::default()
            };
        }

        Self {
            category: pieces[0].to_string(),
            data_type: pieces[1].to_string(),
            timestamp_ms: pieces[pieces.len() - 1].parse().unwrap_or(0),
            extension,
        }
    }

    pub fn is_survey_data(&self) -> bool {
        self.data_type.starts_with("survey")
    }
}

/// Build a file name following the upload naming scheme.
pub fn artifact_file_name(category: &str, data_type: &str, timestamp_ms: i64, ext: &str) -> String {
    format!("{category}_{data_type}_{timestamp_ms}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_name() {
        let parsed = ParsedFileName::parse("p123_gps_1700000000000.csv");
        assert_eq!(parsed.category, "p123");
        assert_eq!(parsed.data_type, "gps");
        assert_eq!(parsed.timestamp_ms, 1_700_000_000_000);
        assert_eq!(parsed.extension, "csv");
        assert!(!parsed.is_survey_data());
    }

    #[test]
    fn timestamp_is_taken_from_last_piece() {
        let parsed = ParsedFileName::parse("p1_surveyAnswers_abc_42.csv");
        assert_eq!(parsed.data_type, "surveyAnswers");
        assert_eq!(parsed.timestamp_ms, 42);
        assert!(parsed.is_survey_data());
    }

    #[test]
    fn short_names_keep_only_extension() {
        let parsed = ParsedFileName::parse("notes.txt");
        assert_eq!(parsed.data_type, "");
        assert_eq!(parsed.timestamp_ms, 0);
        assert_eq!(parsed.extension, "txt");
    }

    #[test]
    fn non_numeric_timestamp_parses_as_zero() {
        assert_eq!(ParsedFileName::parse("a_b_later.csv").timestamp_ms, 0);
    }

    #[test]
    fn builds_names_in_the_same_scheme() {
        let name = artifact_file_name("p1", "accel", 99, "csv");
        assert_eq!(name, "p1_accel_99.csv");
        assert_eq!(ParsedFileName::parse(&name).timestamp_ms, 99);
    }
}
