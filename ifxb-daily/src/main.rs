//! ifxb-daily - daily InfluxDB backup runner
//!
//! Exports yesterday's data (or the day given by `--start-date`) on the
//! source host, downloads it, and optionally re-ingests it into the target
//! store. Intended to run once a day from cron or a systemd timer.
//!
//! Exit status is 0 for every completed run (including skipped writes) and
//! 1 when a stage fails or the configuration cannot be loaded.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ifxb_common::config::{load_config, ConfigSource};
use ifxb_common::logging::init_tracing;
use ifxb_common::time;
use ifxb_daily::command::SystemProcessRunner;
use ifxb_daily::notify::WebhookNotifier;
use ifxb_daily::session::SshConnector;
use ifxb_daily::{BackupPipeline, BackupSettings};
use tracing::{info, warn};

/// Command-line arguments for ifxb-daily
#[derive(Parser, Debug)]
#[command(name = "ifxb-daily")]
#[command(about = "Daily InfluxDB export, download and re-ingest")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to IFXB_CONFIG, then the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First day of the backup window, YYYY-MM-DD (default: yesterday)
    #[arg(long, env = "START_DATE")]
    start_date: Option<String>,

    /// Download only; skip ingestion and verification
    #[arg(
        long,
        env = "SKIP_WRITE",
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true",
        value_parser = parse_flag
    )]
    skip_write: bool,
}

/// `true`, `1` and `yes` (any case) enable a flag; everything else disables it
fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ifxb-daily: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    let config = loaded.config;

    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting ifxb-daily v{}", env!("CARGO_PKG_VERSION"));
    match &loaded.source {
        ConfigSource::File(path) => info!("Configuration: {}", path.display()),
        ConfigSource::Defaults => warn!("No configuration file found, using built-in defaults"),
    }

    let notifier = WebhookNotifier::new(config.alert.webhook_url.clone(), config.alert.timeout())
        .context("Failed to build webhook client")?;

    // An empty START_DATE means "not set"
    let start_date = args.start_date.filter(|s| !s.is_empty());
    let settings = BackupSettings::from_config(&config, start_date, args.skip_write);

    let pipeline = BackupPipeline::new(settings, SshConnector, SystemProcessRunner, notifier);
    let outcome = pipeline.run(time::today()).await;

    Ok(ExitCode::from(outcome.exit_code()))
}
