use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the recording store.
///
/// Every variant means the local store could not complete the operation
/// (it failed to open, a transaction aborted, the disk is full). Callers
/// treat all of them as "storage unavailable": surface it and retry later.
/// Missing sessions are never errors; lookups return `None` and deletes
/// are no-ops.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open recording store at {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("recording store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },

    #[error("storage transaction failed: {0}")]
    Transaction(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Whether retrying the same call can succeed. A database written by a
    /// newer schema never will.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::UnsupportedSchema { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
