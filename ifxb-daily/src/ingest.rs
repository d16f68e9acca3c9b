//! Re-ingestion of a downloaded artifact into the target store
//!
//! The archive is decompressed next to itself (`.lp.gz` → `.lp`), bulk
//! loaded with `influx write`, and the decompressed copy is removed whatever
//! the outcome. The compressed archive is kept.

use crate::command::{CommandSpec, ProcessRunner};
use crate::error::{BackupError, Result};
use flate2::read::MultiGzDecoder;
use ifxb_common::config::TargetConfig;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Path of the decompressed copy: the archive path without `.gz`
pub fn decompressed_path(archive: &Path) -> PathBuf {
    match archive.extension() {
        Some(ext) if ext == "gz" => archive.with_extension(""),
        _ => {
            let mut name = archive.as_os_str().to_os_string();
            name.push(".decompressed");
            PathBuf::from(name)
        }
    }
}

/// Temporary decompressed file, removed on drop (best effort)
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed temporary file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary file {}: {}", self.path.display(), e),
        }
    }
}

/// Stream-decompress `archive` into `output`; returns decompressed bytes
pub async fn decompress(archive: &Path, output: &Path) -> Result<u64> {
    let archive = archive.to_path_buf();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let fail = |e: io::Error| {
            BackupError::Decompression(format!("{}: {}", archive.display(), e))
        };

        let source = File::open(&archive).map_err(fail)?;
        let mut decoder = MultiGzDecoder::new(BufReader::new(source));
        let target = File::create(&output).map_err(|e| {
            BackupError::Decompression(format!("Cannot create {}: {}", output.display(), e))
        })?;
        let mut writer = BufWriter::new(target);

        let bytes = io::copy(&mut decoder, &mut writer).map_err(fail)?;
        writer.flush().map_err(fail)?;
        Ok(bytes)
    })
    .await?
}

/// Build the bulk-load invocation
pub fn write_command(target: &TargetConfig, file: &Path) -> CommandSpec {
    CommandSpec::new(&target.influx_bin)
        .arg("write")
        .flag("--bucket", &target.bucket)
        .flag("--org", &target.org)
        .secret_flag("--token", &target.token)
        .flag("--host", &target.host)
        .flag("--file", file.to_string_lossy())
}

/// Outcome of a successful bulk load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub decompressed_bytes: u64,
    pub stdout: String,
}

/// Decompress `archive` and bulk-load it into `target.bucket`
pub async fn ingest<R>(runner: &R, archive: &Path, target: &TargetConfig) -> Result<IngestReport>
where
    R: ProcessRunner + ?Sized,
{
    info!(
        "Writing {} into bucket '{}' at {}",
        archive.display(),
        target.bucket,
        target.host
    );

    // Guard first: a half-written file from a failed decompression goes too
    let temp = TempArtifact::new(decompressed_path(archive));

    info!("Decompressing {} -> {}", archive.display(), temp.path().display());
    let decompressed_bytes = decompress(archive, temp.path()).await.map_err(|e| {
        error!("Decompression failed: {}", e);
        e
    })?;
    info!("Decompressed {} bytes", decompressed_bytes);

    let command = write_command(target, temp.path());
    info!(command = %command, "Executing bulk load");
    let output = runner.run(&command).await?;

    if !output.success() {
        error!(
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "Bulk load failed"
        );
        return Err(BackupError::Ingestion {
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }

    info!(stdout = %output.stdout.trim(), "Bulk load succeeded");
    Ok(IngestReport {
        decompressed_bytes,
        stdout: output.stdout,
    })
}
