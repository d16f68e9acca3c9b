//! Tracing subscriber setup
//!
//! Called once from `main`, before any pipeline component is constructed.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the level filter: `RUST_LOG` wins over the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))
}

/// Install the global subscriber: stderr always, plus the log file if configured
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| Error::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::LoggingInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_rejects_garbage_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "info,=[".to_string(),
            file: None,
        };
        assert!(build_filter(&config).is_err());
    }

    #[test]
    fn test_build_filter_accepts_directives() {
        let config = LoggingConfig {
            level: "ifxb_daily=debug,info".to_string(),
            file: None,
        };
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_unopenable_log_file_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("backup.log");
        let config = LoggingConfig {
            level: "info".to_string(),
            file: Some(path.clone()),
        };

        match init_tracing(&config) {
            Err(Error::LogFile { path: got, .. }) => assert_eq!(got, path),
            other => panic!("expected LogFile error, got {:?}", other),
        }
    }
}
