//! Backup window and artifact naming
//!
//! A run covers exactly one calendar day, `[start, start + 1 day)`. Bounds
//! are rendered as UTC midnight timestamps for both the exporter and the
//! count queries.

use crate::error::{BackupError, Result};
use chrono::NaiveDate;
use std::fmt;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Half-open single-day window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl BackupWindow {
    /// Window covering the single day `start`
    pub fn starting(start: NaiveDate) -> Result<Self> {
        let end = start.succ_opt().ok_or_else(|| BackupError::Validation {
            input: start.to_string(),
        })?;
        Ok(Self { start, end })
    }

    /// Default window: yesterday → today
    pub fn ending(today: NaiveDate) -> Result<Self> {
        let start = today
            .pred_opt()
            .ok_or_else(|| BackupError::Internal(format!("No day precedes {}", today)))?;
        Ok(Self { start, end: today })
    }

    /// Derive the run's window from an optional explicit start date
    pub fn resolve(explicit_start: Option<&str>, today: NaiveDate) -> Result<Self> {
        match explicit_start {
            Some(input) => Self::starting(parse_start_date(input)?),
            None => Self::ending(today),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Inclusive lower bound, e.g. `2025-09-03T00:00:00Z`
    pub fn start_timestamp(&self) -> String {
        utc_midnight(self.start)
    }

    /// Exclusive upper bound
    pub fn end_timestamp(&self) -> String {
        utc_midnight(self.end)
    }

    /// Deterministic artifact file name, e.g. `bak_2025-09-03_to_2025-09-04.lp.gz`
    pub fn artifact_name(&self) -> String {
        format!(
            "bak_{}_to_{}.lp.gz",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

impl fmt::Display for BackupWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

fn utc_midnight(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format(DATE_FORMAT))
}

/// Strict `YYYY-MM-DD`: ten characters, zero-padded, a real calendar date
pub fn parse_start_date(input: &str) -> Result<NaiveDate> {
    let invalid = || BackupError::Validation {
        input: input.to_string(),
    };

    let bytes = input.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(input, DATE_FORMAT).map_err(|_| invalid())
}

/// Remote and local locations of the run's compressed artifact
///
/// The local copy is kept after the run; nothing prunes old artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// POSIX path on the source host
    pub remote: String,
    /// Path on this host
    pub local: PathBuf,
}

impl ArtifactPaths {
    pub fn new(window: &BackupWindow, remote_dir: &str, local_dir: &Path) -> Self {
        let name = window.artifact_name();
        let remote = if remote_dir.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", remote_dir.trim_end_matches('/'), name)
        };

        Self {
            remote,
            local: local_dir.join(name),
        }
    }

    /// Export artifacts are always gzip-compressed
    pub fn is_compressed(&self) -> bool {
        true
    }
}
