//! Remote export of one backup window
//!
//! Runs `influxd inspect export-lp` on the source host, writing a gzip
//! line-protocol file straight into the remote backup directory.

use crate::command::CommandSpec;
use crate::error::Result;
use crate::session::{self, RemoteSession};
use crate::window::BackupWindow;

/// What to export and where to put it
#[derive(Debug, Clone)]
pub struct ExportRequest<'a> {
    pub bucket_id: &'a str,
    pub engine_path: &'a str,
    pub output_path: &'a str,
    pub use_sudo: bool,
}

/// `mkdir -p <dir>`; succeeds when the directory already exists
pub async fn ensure_remote_dir<S>(session: &S, dir: &str) -> Result<()>
where
    S: RemoteSession + ?Sized,
{
    let command = CommandSpec::new("mkdir").arg("-p").arg(dir);
    session::execute(session, &command).await?;
    Ok(())
}

/// Build the export invocation for `window`
pub fn export_command(window: &BackupWindow, request: &ExportRequest<'_>) -> CommandSpec {
    CommandSpec::new("influxd")
        .args(["inspect", "export-lp"])
        .flag("--bucket-id", request.bucket_id)
        .flag("--engine-path", request.engine_path)
        .flag("--output-path", request.output_path)
        .flag("--start", window.start_timestamp())
        .flag("--end", window.end_timestamp())
        .arg("--compress")
        .privileged(request.use_sudo)
        .stamp_completion()
}

/// Run the export and block until the remote exporter exits
///
/// Returns the command's stdout (the trailing `date` completion stamp).
pub async fn export<S>(session: &S, window: &BackupWindow, request: &ExportRequest<'_>) -> Result<String>
where
    S: RemoteSession + ?Sized,
{
    let command = export_command(window, request);
    tracing::info!(window = %window, output = request.output_path, "Starting remote export");
    session::execute(session, &command).await
}
