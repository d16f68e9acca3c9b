//! Backup pipeline controller
//!
//! # Stage Progression
//! COMPUTE_WINDOW → ENSURE_LOCAL_DIR → OPEN_SESSION → ENSURE_REMOTE_DIR →
//! EXPORT → DOWNLOAD → [PRE_CHECK → INGEST → POST_CHECK → RECONCILE] → DONE
//!
//! Stages run strictly one after another. The first failing stage ends the
//! run: one alert is attempted and the outcome is [`PipelineOutcome::Failed`].
//! The bracketed stages are skipped when writing is disabled or the target
//! store still carries placeholder settings; both count as completed runs.

use crate::command::ProcessRunner;
use crate::error::BackupError;
use crate::export::{self, ExportRequest};
use crate::ingest;
use crate::notify::{AlertMessage, Notifier};
use crate::session::{SessionConnector, SessionGuard};
use crate::transfer::{self, TransferReport};
use crate::verify::{self, Reconciliation};
use crate::window::{ArtifactPaths, BackupWindow};
use chrono::NaiveDate;
use ifxb_common::config::{SourceConfig, TargetConfig, TomlConfig};
use ifxb_common::time;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ComputeWindow,
    EnsureLocalDir,
    OpenSession,
    EnsureRemoteDir,
    Export,
    Download,
    PreCheck,
    Ingest,
    PostCheck,
    Reconcile,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ComputeWindow => "COMPUTE_WINDOW",
            Stage::EnsureLocalDir => "ENSURE_LOCAL_DIR",
            Stage::OpenSession => "OPEN_SESSION",
            Stage::EnsureRemoteDir => "ENSURE_REMOTE_DIR",
            Stage::Export => "EXPORT",
            Stage::Download => "DOWNLOAD",
            Stage::PreCheck => "PRE_CHECK",
            Stage::Ingest => "INGEST",
            Stage::PostCheck => "POST_CHECK",
            Stage::Reconcile => "RECONCILE",
            Stage::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage a run died in, and why
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: BackupError,
}

impl StageFailure {
    pub fn new(stage: Stage, error: BackupError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// What happened after the download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Ingested and reconciled
    Ingested(Reconciliation),
    /// Writing disabled for this run
    SkippedByRequest,
    /// Target settings missing or still placeholders
    SkippedUnconfigured { fields: Vec<&'static str> },
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub window: BackupWindow,
    pub artifacts: ArtifactPaths,
    pub transfer: TransferReport,
    pub write: WriteDisposition,
}

/// Final result of one run
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(RunReport),
    Failed(StageFailure),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Completed(_))
    }

    /// Process exit status: 0 for any completed run, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Per-run inputs
#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Explicit `YYYY-MM-DD` window start; yesterday when absent
    pub start_date: Option<String>,
    pub skip_write: bool,
    pub source: SourceConfig,
    pub local_dir: PathBuf,
    pub target: TargetConfig,
    pub alert_title: String,
}

impl BackupSettings {
    pub fn from_config(config: &TomlConfig, start_date: Option<String>, skip_write: bool) -> Self {
        Self {
            start_date,
            skip_write,
            source: config.source.clone(),
            local_dir: config.local.backup_dir.clone(),
            target: config.target.clone(),
            alert_title: config.alert.title.clone(),
        }
    }
}

fn at(stage: Stage) -> impl FnOnce(BackupError) -> StageFailure {
    move |error| StageFailure::new(stage, error)
}

fn enter(stage: Stage) {
    info!(stage = %stage, "Entering stage {}", stage);
}

/// Backup pipeline controller
pub struct BackupPipeline<C, R, N> {
    settings: BackupSettings,
    connector: C,
    runner: R,
    notifier: N,
}

impl<C, R, N> BackupPipeline<C, R, N>
where
    C: SessionConnector,
    R: ProcessRunner,
    N: Notifier,
{
    pub fn new(settings: BackupSettings, connector: C, runner: R, notifier: N) -> Self {
        Self {
            settings,
            connector,
            runner,
            notifier,
        }
    }

    /// Execute one run; `today` anchors the default window
    pub async fn run(&self, today: NaiveDate) -> PipelineOutcome {
        let span = info_span!("backup_run", window = tracing::field::Empty);
        let started = Instant::now();

        let result = self.execute(today).instrument(span.clone()).await;
        let elapsed_secs = started.elapsed().as_secs();

        match result {
            Ok(report) => {
                span.in_scope(|| {
                    info!(stage = %Stage::Done, elapsed_secs, "Backup run completed");
                });
                PipelineOutcome::Completed(report)
            }
            Err(failure) => {
                span.in_scope(|| {
                    error!(
                        stage = %failure.stage,
                        error = %failure.error,
                        elapsed_secs,
                        "Backup run failed"
                    );
                });
                self.alert(&failure).instrument(span).await;
                PipelineOutcome::Failed(failure)
            }
        }
    }

    async fn execute(&self, today: NaiveDate) -> Result<RunReport, StageFailure> {
        let settings = &self.settings;

        enter(Stage::ComputeWindow);
        let window = BackupWindow::resolve(settings.start_date.as_deref(), today)
            .map_err(at(Stage::ComputeWindow))?;
        tracing::Span::current().record("window", tracing::field::display(&window));
        let artifacts = ArtifactPaths::new(&window, &settings.source.backup_dir, &settings.local_dir);
        info!(
            remote = %artifacts.remote,
            local = %artifacts.local.display(),
            "Backup window {}",
            window
        );

        enter(Stage::EnsureLocalDir);
        tokio::fs::create_dir_all(&settings.local_dir)
            .await
            .map_err(|e| StageFailure::new(Stage::EnsureLocalDir, BackupError::Io(e)))?;

        enter(Stage::OpenSession);
        let session = SessionGuard::new(
            self.connector
                .acquire(&settings.source)
                .await
                .map_err(at(Stage::OpenSession))?,
        );

        enter(Stage::EnsureRemoteDir);
        export::ensure_remote_dir(&*session, &settings.source.backup_dir)
            .await
            .map_err(at(Stage::EnsureRemoteDir))?;

        enter(Stage::Export);
        let request = ExportRequest {
            bucket_id: &settings.source.bucket_id,
            engine_path: &settings.source.engine_path,
            output_path: &artifacts.remote,
            use_sudo: settings.source.use_sudo,
        };
        let stamp = export::export(&*session, &window, &request)
            .await
            .map_err(at(Stage::Export))?;
        info!(finished_at = %stamp.trim(), "Remote export finished");

        enter(Stage::Download);
        let transfer = transfer::download(&*session, &artifacts.remote, &artifacts.local)
            .await
            .map_err(at(Stage::Download))?;
        session.release();

        let report = |write| RunReport {
            window,
            artifacts: artifacts.clone(),
            transfer,
            write,
        };

        if settings.skip_write {
            info!(
                "Write skipped by request; backup kept at {}",
                artifacts.local.display()
            );
            return Ok(report(WriteDisposition::SkippedByRequest));
        }

        let fields = settings.target.unset_fields();
        if !fields.is_empty() {
            warn!(
                ?fields,
                "Target store not configured ({} unset or placeholder); skipping write. \
                 Backup kept at {}",
                fields.join(", "),
                artifacts.local.display()
            );
            return Ok(report(WriteDisposition::SkippedUnconfigured { fields }));
        }

        let target = &settings.target;
        let measurement = target.measurement.as_str();

        enter(Stage::PreCheck);
        let before = verify::count(&self.runner, target, &window, measurement)
            .await
            .map_err(at(Stage::PreCheck))?;

        enter(Stage::Ingest);
        ingest::ingest(&self.runner, &artifacts.local, target)
            .await
            .map_err(at(Stage::Ingest))?;

        enter(Stage::PostCheck);
        let after = verify::count(&self.runner, target, &window, measurement)
            .await
            .map_err(at(Stage::PostCheck))?;

        enter(Stage::Reconcile);
        let reconciliation = Reconciliation::new(before, after);
        reconciliation.log();

        Ok(report(WriteDisposition::Ingested(reconciliation)))
    }

    async fn alert(&self, failure: &StageFailure) {
        let message = AlertMessage::failure(
            &self.settings.alert_title,
            &time::format_timestamp(&time::now()),
            failure,
        );

        match self.notifier.send(&message).await {
            Ok(()) => info!("Failure alert sent"),
            Err(e) => error!("Failed to send failure alert: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::ComputeWindow.to_string(), "COMPUTE_WINDOW");
        assert_eq!(Stage::EnsureRemoteDir.to_string(), "ENSURE_REMOTE_DIR");
        assert_eq!(Stage::PostCheck.to_string(), "POST_CHECK");
    }

    #[test]
    fn test_failure_exit_code() {
        let outcome = PipelineOutcome::Failed(StageFailure::new(
            Stage::Download,
            BackupError::Transfer("reset by peer".to_string()),
        ));
        assert!(!outcome.is_success());
        assert_eq!(outcome.exit_code(), 1);

        if let PipelineOutcome::Failed(failure) = outcome {
            assert_eq!(
                failure.to_string(),
                "DOWNLOAD failed: Transfer error: reset by peer"
            );
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = TomlConfig::default();
        let settings = BackupSettings::from_config(&config, Some("2025-09-03".to_string()), true);

        assert_eq!(settings.start_date.as_deref(), Some("2025-09-03"));
        assert!(settings.skip_write);
        assert_eq!(settings.local_dir, config.local.backup_dir);
        assert_eq!(settings.alert_title, "InfluxDB daily backup failed");
    }
}
