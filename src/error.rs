//! Domain error taxonomy.
//!
//! Nothing here is fatal to the duty-cycle loop: pipelines record these as
//! values in their reports and carry on with the next file, slot or tick.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    /// A single transfer failed; the file stays on disk for the next pass.
    #[error("transfer of {file} failed: {reason}")]
    TransientNetwork { file: String, reason: String },

    /// On-disk usage is above the configured ceiling after an upload pass.
    #[error("storage quota exceeded: {used} bytes used, limit {limit}")]
    QuotaExceeded { used: u64, limit: u64 },

    /// A data service refused to initialise or failed to toggle.
    #[error("service {service} failed: {reason}")]
    ServiceInit { service: String, reason: String },

    /// A delete/move/enumerate on the data directories failed.
    #[error("storage I/O on {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("config error: {0}")]
    Config(String),
}

impl StudyError {
    pub fn storage_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StudyError::StorageIo {
            path: path.into(),
            source,
        }
    }

    pub fn transient(file: impl Into<String>, reason: impl ToString) -> Self {
        StudyError::TransientNetwork {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}
