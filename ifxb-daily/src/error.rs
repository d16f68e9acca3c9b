//! Error types for ifxb-daily
//!
//! One variant per failure class a backup stage can produce. Every variant
//! aborts the run; there is no retry and no rollback of artifacts already
//! produced.

use thiserror::Error;

/// Main error type for backup stages
#[derive(Error, Debug)]
pub enum BackupError {
    /// Malformed explicit start date
    #[error("Invalid start date '{input}': expected YYYY-MM-DD, e.g. 2025-08-29")]
    Validation { input: String },

    /// Session could not be opened or a session channel failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote or local process exited non-zero
    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    Command {
        /// Redacted rendering of the command line
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Download failed or produced an unreadable file
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Archive missing, corrupt, or not gzip
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Bulk load into the target store failed
    #[error("Ingestion failed with exit code {exit_code}: {stderr}")]
    Ingestion { exit_code: i32, stderr: String },

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackupError::Internal(format!("Blocking task failed: {}", err))
    }
}

/// Convenience Result type using BackupError
pub type Result<T> = std::result::Result<T, BackupError>;
