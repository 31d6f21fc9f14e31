//! Error types for channels, checkpoints and store backends

use thiserror::Error;

/// Convenience result type using [`CheckpointError`]
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised by channels, codecs and checkpoint store backends
///
/// Store backends must never leave a thread's history partially written:
/// a failed `put` surfaces one of these variants and the previously stored
/// history remains intact.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Filesystem or socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint data could not be serialized or deserialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored history could not be parsed back into checkpoint records
    #[error("corrupt checkpoint history: {0}")]
    Corrupt(String),

    /// A channel rejected an update
    #[error("invalid channel update: {0}")]
    InvalidUpdate(String),

    /// A typed value was encoded or decoded without a registered codec,
    /// or with a mismatched tag
    #[error("codec error: {0}")]
    Codec(String),

    /// Backend-specific failure that is not an I/O or serialization error
    #[error("backend error: {0}")]
    Backend(String),

    /// Database failure from the sqlite backend
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
}
