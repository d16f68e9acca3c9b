//! # ifxb-daily
//!
//! Single-run daily backup of an InfluxDB bucket:
//! export on the source host, SFTP download, optional re-ingestion into a
//! target store with before/after count reconciliation, and a webhook alert
//! when any stage fails.
//!
//! # Stage Progression
//! COMPUTE_WINDOW → ENSURE_LOCAL_DIR → OPEN_SESSION → ENSURE_REMOTE_DIR →
//! EXPORT → DOWNLOAD → [PRE_CHECK → INGEST → POST_CHECK → RECONCILE] → DONE

pub mod command;
pub mod error;
pub mod export;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod transfer;
pub mod verify;
pub mod window;

pub use error::{BackupError, Result};
pub use pipeline::{BackupPipeline, BackupSettings, PipelineOutcome, Stage};
pub use window::{ArtifactPaths, BackupWindow};
