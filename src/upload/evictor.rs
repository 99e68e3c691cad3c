use crate::error::StudyError;
use crate::models::UploadArtifact;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Default)]
pub struct EvictionReport {
    pub evicted_files: Vec<String>,
    pub evicted_bytes: u64,
    pub remaining_bytes: u64,
    pub failures: Vec<StudyError>,
}

/// Deletes the oldest evictable files until usage drops below the quota.
/// Survey data and files of any other format are never touched.
#[derive(Debug, Clone)]
pub struct QuotaEvictor {
    quota_bytes: u64,
    evictable_extension: String,
}

impl QuotaEvictor {
    pub fn new(quota_bytes: u64, evictable_extension: impl Into<String>) -> Self {
        Self {
            quota_bytes,
            evictable_extension: evictable_extension.into(),
        }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    pub fn is_over_quota(&self, used_bytes: u64) -> bool {
        used_bytes > self.quota_bytes
    }

    fn is_evictable(&self, file: &UploadArtifact) -> bool {
        let parsed = file.parsed();
        parsed.extension.eq_ignore_ascii_case(&self.evictable_extension) && !parsed.is_survey_data()
    }

    pub async fn purge(&self, mut files: Vec<UploadArtifact>, used_bytes: u64) -> EvictionReport {
        let mut report = EvictionReport {
            remaining_bytes: used_bytes,
            ..EvictionReport::default()
        };
        log_info!(
            "Purging upload queue: {used_bytes} bytes used, quota {}",
            self.quota_bytes
        );

        files.sort_by_key(|file| file.parsed().timestamp_ms);

        for file in files {
            if report.remaining_bytes < self.quota_bytes {
                break;
            }
            if !self.is_evictable(&file) {
                log_debug!("Keeping {} during purge", file.file_name);
                continue;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    log_info!("Evicted {} ({} bytes)", file.file_name, file.size_bytes);
                    report.remaining_bytes = report.remaining_bytes.saturating_sub(file.size_bytes);
                    report.evicted_bytes += file.size_bytes;
                    report.evicted_files.push(file.file_name);
                }
                Err(err) => {
                    let err = StudyError::storage_io(&file.path, err);
                    log_warn!("{err}");
                    report.failures.push(err);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const MB: u64 = 1024 * 1024;

    fn artifact(dir: &Path, name: &str, size_bytes: u64) -> UploadArtifact {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        UploadArtifact {
            file_name: name.to_string(),
            path,
            size_bytes,
        }
    }

    #[tokio::test]
    async fn evicts_only_the_oldest_file_needed() {
        let dir = tempfile::tempdir().unwrap();
        let newer = artifact(dir.path(), "p1_gps_2000.csv", 160 * MB);
        let older = artifact(dir.path(), "p1_accel_1000.csv", 100 * MB);

        let report = QuotaEvictor::new(250 * MB, "csv")
            .purge(vec![newer.clone(), older.clone()], 260 * MB)
            .await;

        assert_eq!(report.evicted_files, vec!["p1_accel_1000.csv"]);
        assert_eq!(report.evicted_bytes, 100 * MB);
        assert_eq!(report.remaining_bytes, 160 * MB);
        assert!(!older.path.exists());
        assert!(newer.path.exists());
    }

    #[tokio::test]
    async fn survey_data_survives_even_when_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let answers = artifact(dir.path(), "p1_surveyAnswers_abc_500.csv", 200 * MB);
        let gps = artifact(dir.path(), "p1_gps_900.csv", 50 * MB);

        let report = QuotaEvictor::new(100 * MB, "csv")
            .purge(vec![answers.clone(), gps.clone()], 250 * MB)
            .await;

        assert!(answers.path.exists());
        assert!(!gps.path.exists());
        assert_eq!(report.evicted_files, vec!["p1_gps_900.csv"]);
        assert_eq!(report.remaining_bytes, 200 * MB);
    }

    #[tokio::test]
    async fn other_formats_are_never_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let audio = artifact(dir.path(), "p1_voiceRecording_100.wav", 300 * MB);

        let report = QuotaEvictor::new(250 * MB, "csv")
            .purge(vec![audio.clone()], 300 * MB)
            .await;

        assert!(audio.path.exists());
        assert!(report.evicted_files.is_empty());
        assert_eq!(report.remaining_bytes, 300 * MB);
    }

    #[tokio::test]
    async fn missing_file_is_recorded_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ghost = UploadArtifact {
            file_name: "p1_gps_100.csv".into(),
            path: dir.path().join("p1_gps_100.csv"),
            size_bytes: 10,
        };
        let real = artifact(dir.path(), "p1_gps_200.csv", 10);

        let report = QuotaEvictor::new(15, "csv").purge(vec![ghost, real], 20).await;

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], StudyError::StorageIo { .. }));
        assert_eq!(report.evicted_files, vec!["p1_gps_200.csv"]);
        assert_eq!(report.remaining_bytes, 10);
    }
}
