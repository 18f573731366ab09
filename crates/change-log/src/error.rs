//! Error type for the change-log store.

use thiserror::Error;

/// Failures from the change-log store or its blob directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite database returned an error.
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    /// A filesystem operation on the blob directory failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// No record exists for the requested file-ID.
    #[error("no such file")]
    NotFound,
}
