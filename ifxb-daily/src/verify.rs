//! Record counts before/after ingestion
//!
//! Counts come from `influx query` text output. The CLI's table layout is
//! not a stable contract, so parsing is lenient: the first line whose last
//! token is an integer wins, and anything unrecognizable is kept verbatim
//! as [`CountValue::Unparsed`] for manual inspection.

use crate::command::{run_checked, CommandSpec, ProcessRunner};
use crate::error::Result;
use crate::window::BackupWindow;
use ifxb_common::config::TargetConfig;
use std::fmt;
use tracing::{info, warn};

/// Result of one count query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountValue {
    Count(i64),
    /// Raw query output that held no recognizable count
    Unparsed(String),
}

impl fmt::Display for CountValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountValue::Count(n) => write!(f, "{}", n),
            CountValue::Unparsed(raw) => write!(f, "{:?}", raw),
        }
    }
}

/// Count of one measurement in one bucket over one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountSnapshot {
    pub bucket: String,
    pub measurement: String,
    pub window: BackupWindow,
    pub value: CountValue,
}

/// Difference between two counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountDelta {
    Exact(i64),
    /// At least one side was unparsed; both raw values are kept
    Indeterminate { before: CountValue, after: CountValue },
}

/// `after - before` when both are counts
pub fn delta(before: &CountValue, after: &CountValue) -> CountDelta {
    match (before, after) {
        (CountValue::Count(b), CountValue::Count(a)) => CountDelta::Exact(a - b),
        _ => CountDelta::Indeterminate {
            before: before.clone(),
            after: after.clone(),
        },
    }
}

/// Before/after counts around an ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub before: CountSnapshot,
    pub after: CountSnapshot,
    pub delta: CountDelta,
}

impl Reconciliation {
    pub fn new(before: CountSnapshot, after: CountSnapshot) -> Self {
        let delta = delta(&before.value, &after.value);
        Self {
            before,
            after,
            delta,
        }
    }

    pub fn log(&self) {
        match &self.delta {
            CountDelta::Exact(added) => info!(
                before = %self.before.value,
                after = %self.after.value,
                added,
                "Count reconciliation: before={}, after={}, added={}",
                self.before.value,
                self.after.value,
                added
            ),
            CountDelta::Indeterminate { before, after } => warn!(
                "Cannot compute exact increment, before={}, after={}",
                before, after
            ),
        }
    }
}

/// Quote a Flux string literal
fn flux_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Flux query summing the per-table counts of `measurement` inside `window`
pub fn count_query(bucket: &str, window: &BackupWindow, measurement: &str) -> String {
    format!(
        "from(bucket: {}) \
         |> range(start: {}, stop: {}) \
         |> filter(fn: (r) => r[\"_measurement\"] == {}) \
         |> count() \
         |> group(columns:[\"_measurement\"]) \
         |> sum()",
        flux_string(bucket),
        window.start_timestamp(),
        window.end_timestamp(),
        flux_string(measurement)
    )
}

/// Build the `influx query` invocation
pub fn query_command(target: &TargetConfig, query: String) -> CommandSpec {
    CommandSpec::new(&target.influx_bin)
        .arg("query")
        .flag("--org", &target.org)
        .secret_flag("--token", &target.token)
        .flag("--host", &target.host)
        .arg(query)
}

/// Extract the count from `influx query` output
///
/// Skips blank lines and `_measurement` header lines; the first line whose
/// final whitespace-separated token is all digits yields the count.
pub fn parse_count_output(output: &str) -> CountValue {
    for line in output.trim().lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("_measurement") {
            continue;
        }

        if let Some(token) = line.split_whitespace().last() {
            if token.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(n) = token.parse::<i64>() {
                    return CountValue::Count(n);
                }
            }
        }
    }

    CountValue::Unparsed(output.to_string())
}

/// Count `measurement` in `target.bucket` over `window`
pub async fn count<R>(
    runner: &R,
    target: &TargetConfig,
    window: &BackupWindow,
    measurement: &str,
) -> Result<CountSnapshot>
where
    R: ProcessRunner + ?Sized,
{
    info!(
        "Counting '{}' in bucket '{}' over {}",
        measurement, target.bucket, window
    );

    let command = query_command(target, count_query(&target.bucket, window, measurement));
    let stdout = run_checked(runner, &command).await?;
    info!(output = %stdout.trim(), "Count query returned");

    let value = parse_count_output(&stdout);
    match &value {
        CountValue::Count(n) => info!("Parsed count: {}", n),
        CountValue::Unparsed(_) => warn!("No numeric count in query output, keeping raw text"),
    }

    Ok(CountSnapshot {
        bucket: target.bucket.clone(),
        measurement: measurement.to_string(),
        window: *window,
        value,
    })
}
