use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::db::RecordStore;
use crate::error::StudyError;
use crate::models::UploadArtifact;
use crate::network::{Transport, UploadMetadata};
use crate::storage::{AppEventLog, StorageLayout};

use super::evictor::QuotaEvictor;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// What one pass did. For a pass that ran,
/// `total_bytes_before == uploaded_bytes + remaining_bytes + evicted_bytes`.
#[derive(Debug, Default)]
pub struct UploadReport {
    /// Another pass was already in flight; nothing was done.
    pub skipped: bool,
    /// The pass reached the end of its transfers without a pipeline error.
    pub completed: bool,
    pub total_bytes_before: u64,
    pub uploaded_files: usize,
    pub uploaded_bytes: u64,
    pub remaining_bytes: u64,
    pub evicted_bytes: u64,
    pub quota_exceeded: bool,
    pub failures: Vec<StudyError>,
}

/// Clears the in-flight flag however the pass ends.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UploadPipeline {
    store: Arc<dyn RecordStore>,
    storage: Arc<StorageLayout>,
    transport: Arc<dyn Transport>,
    evictor: QuotaEvictor,
    app_log: AppEventLog,
    in_flight: Arc<AtomicBool>,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        storage: Arc<StorageLayout>,
        transport: Arc<dyn Transport>,
        evictor: QuotaEvictor,
        app_log: AppEventLog,
    ) -> Self {
        Self {
            store,
            storage,
            transport,
            evictor,
            app_log,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// One upload pass. With `process_only` files are rotated and measured
    /// but not transferred. A call while a pass is running returns at once
    /// with `skipped` set.
    pub async fn upload(&self, process_only: bool) -> UploadReport {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            log_info!("Upload already in flight, skipping");
            return UploadReport {
                skipped: true,
                ..UploadReport::default()
            };
        };
        log_info!("Checking for uploads (process_only={process_only})");

        let mut report = UploadReport::default();
        let pending = match self.collect(&mut report).await {
            Ok(pending) => pending,
            Err(err) => {
                log_error!("Upload pass could not enumerate files: {err:?}");
                self.app_log
                    .log_event("upload_incomplete", "Upload Incomplete", "0");
                self.storage.clear_temp().await;
                return report;
            }
        };

        let pending = if process_only {
            log_info!("Skipping transfers, processing only");
            pending
        } else {
            self.transfer_all(pending, &mut report).await
        };
        report.completed = true;
        log_info!(
            "Uploaded {} files, {} bytes left of {}",
            report.uploaded_files,
            report.remaining_bytes,
            report.total_bytes_before
        );
        self.app_log.log_event(
            "upload_complete",
            "Upload Complete",
            &report.uploaded_files.to_string(),
        );

        if self.evictor.is_over_quota(report.remaining_bytes) {
            let exceeded = StudyError::QuotaExceeded {
                used: report.remaining_bytes,
                limit: self.evictor.quota_bytes(),
            };
            log_warn!("{exceeded}");
            report.quota_exceeded = true;
            self.app_log.log_event(
                "purge",
                "Purging too large data files",
                &report.remaining_bytes.to_string(),
            );
            let eviction = self.evictor.purge(pending, report.remaining_bytes).await;
            report.evicted_bytes = eviction.evicted_bytes;
            report.remaining_bytes = eviction.remaining_bytes;
            report.failures.extend(eviction.failures);
        }

        self.storage.clear_temp().await;
        report
    }

    /// Compact, rotate current files, and enumerate the queue oldest first.
    async fn collect(&self, report: &mut UploadReport) -> Result<Vec<UploadArtifact>> {
        if let Err(err) = self.store.compact().await {
            log_warn!("Compaction before upload failed: {err:?}");
            report.failures.push(StudyError::Persistence(format!("{err:#}")));
        }
        if let Err(err) = self.storage.prepare_for_upload() {
            log_warn!("prepare_for_upload failed: {err:?}");
        }

        let mut files = self
            .storage
            .list_upload_files()
            .await
            .context("failed to enumerate upload queue")?;
        files.sort_by_key(|file| file.parsed().timestamp_ms);

        report.total_bytes_before = files.iter().map(|file| file.size_bytes).sum();
        report.remaining_bytes = report.total_bytes_before;
        log_info!(
            "{} files pending, {} bytes",
            files.len(),
            report.total_bytes_before
        );
        Ok(files)
    }

    /// Upload strictly one file at a time. Returns the files still on disk.
    async fn transfer_all(
        &self,
        files: Vec<UploadArtifact>,
        report: &mut UploadReport,
    ) -> Vec<UploadArtifact> {
        let mut left = Vec::new();
        for file in files {
            let metadata = UploadMetadata {
                file_name: file.file_name.clone(),
                size_bytes: file.size_bytes,
            };
            log_info!("Uploading {}", file.file_name);

            if let Err(err) = self.transport.upload_file(&metadata, &file.path).await {
                let err = StudyError::transient(&file.file_name, format!("{err:#}"));
                log_warn!("{err}");
                self.app_log
                    .log_event("upload_file_failed", "Failed Uploaded data file", &file.file_name);
                report.failures.push(err);
                left.push(file);
                continue;
            }

            self.app_log
                .log_event("uploaded", "Uploaded data file", &file.file_name);
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    report.uploaded_files += 1;
                    report.uploaded_bytes += file.size_bytes;
                    report.remaining_bytes -= file.size_bytes;
                }
                Err(err) => {
                    let err = StudyError::storage_io(&file.path, err);
                    log_warn!("Uploaded but could not remove: {err}");
                    report.failures.push(err);
                    left.push(file);
                }
            }
        }
        left
    }
}
