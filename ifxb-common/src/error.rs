//! Setup errors shared by ifxb binaries
//!
//! Everything here happens before a backup run starts; `main` reports these
//! on stderr and exits non-zero without alerting.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file named on the CLI/env or found on the search path is unreadable
    #[error("Cannot read config file {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML syntax or type mismatch, or an unusable log level
    #[error("Configuration error: {0}")]
    Config(String),

    /// Log file cannot be opened for appending
    #[error("Cannot open log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A global tracing subscriber is already installed
    #[error("Logging already initialized: {0}")]
    LoggingInit(String),
}
