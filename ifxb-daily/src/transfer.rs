//! Artifact download (remote → local)
//!
//! Single-file SFTP GET with progress logging. There is no resume: a failed
//! transfer leaves whatever was written and the next run downloads again.

use crate::error::{BackupError, Result};
use crate::session::RemoteSession;
use std::path::Path;
use tracing::{info, warn};

/// Files below this size log progress on every chunk
const SMALL_FILE_BYTES: u64 = 1024 * 1024;

/// Progress is logged each time another 1/STEPS of the file has arrived (5%)
const STEPS: u128 = 20;

/// Progress observer for a single transfer
///
/// Receives the running byte count and logs `(transferred, total)` at every
/// 5% boundary crossed, or on every call for files under 1 MiB.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    last_step: u128,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self { total, last_step: 0 }
    }

    /// Record progress; returns true when a progress line was logged
    pub fn observe(&mut self, transferred: u64) -> bool {
        let report = if self.total < SMALL_FILE_BYTES {
            true
        } else {
            let step = transferred as u128 * STEPS / self.total as u128;
            if step > self.last_step {
                self.last_step = step;
                true
            } else {
                false
            }
        };

        if report {
            info!(
                "Download progress: {}/{} bytes ({:.1}%)",
                transferred,
                self.total,
                percent(transferred, self.total)
            );
        }
        report
    }
}

fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        transferred as f64 / total as f64 * 100.0
    }
}

/// Byte counts of a finished download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub remote_size: u64,
    pub transferred: u64,
    pub local_size: u64,
}

/// Download `remote_path` to `local_path`
pub async fn download<S>(session: &S, remote_path: &str, local_path: &Path) -> Result<TransferReport>
where
    S: RemoteSession + ?Sized,
{
    info!("Starting download: {} -> {}", remote_path, local_path.display());

    let remote_size = session.file_size(remote_path).await?;
    info!("Remote file size: {} bytes", remote_size);

    let transferred = session
        .fetch(remote_path, local_path, ProgressTracker::new(remote_size))
        .await?;

    if transferred < remote_size {
        return Err(BackupError::Transfer(format!(
            "Transfer of {} interrupted: received {} of {} bytes",
            remote_path, transferred, remote_size
        )));
    }

    let local_size = tokio::fs::metadata(local_path)
        .await
        .map_err(|e| {
            BackupError::Transfer(format!(
                "Downloaded file {} is unreadable: {}",
                local_path.display(),
                e
            ))
        })?
        .len();

    if local_size != remote_size {
        warn!(
            "Local size {} differs from remote size {} for {}",
            local_size,
            remote_size,
            local_path.display()
        );
    }

    info!("Download complete: {} ({} bytes)", local_path.display(), local_size);
    Ok(TransferReport {
        remote_size,
        transferred,
        local_size,
    })
}
