//! Error types for the backup engine.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Table {table}: {message}")]
    Table { table: String, message: String },

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Download failed for {key}: {message}")]
    DownloadFailed { key: String, message: String },

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup {id} is {status} and cannot be used")]
    BackupNotRestorable { id: String, status: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Operation timed out after {after:?}: {what}")]
    Timeout { what: String, after: Duration },

    #[error("{0} is already running")]
    AlreadyRunning(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Shorthand for a table-scoped failure.
    pub fn table(table: impl Into<String>, message: impl ToString) -> Self {
        EngineError::Table {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error means the whole operation was interrupted rather than failed.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Cancelled(_) | EngineError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
