//! Configuration loading and config file resolution
//!
//! All settings live in a single TOML file. Every field has a compiled
//! default; credentials and target-store settings default to placeholders so
//! an unedited install is recognizable at runtime.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`IFXB_CONFIG`)
//! 3. User config file (`~/.config/ifxb/config.toml`)
//! 4. System config file (`/etc/ifxb/config.toml`)
//! 5. Compiled defaults (fallback)
//!
//! Secrets can additionally be supplied through the environment, which wins
//! over the TOML value (see [`TomlConfig::apply_env_overrides`]).

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "IFXB_CONFIG";
/// Environment override for `source.password`
pub const ENV_SSH_PASSWORD: &str = "IFXB_SSH_PASSWORD";
/// Environment override for `target.token`
pub const ENV_INFLUX_TOKEN: &str = "IFXB_INFLUX_TOKEN";
/// Environment override for `alert.webhook_url`
pub const ENV_WEBHOOK_URL: &str = "IFXB_WEBHOOK_URL";

pub const PLACEHOLDER_ORG: &str = "your_organization";
pub const PLACEHOLDER_TOKEN: &str = "your_api_token";
pub const PLACEHOLDER_BUCKET: &str = "target_bucket_name";

/// Default measurement used for count reconciliation
pub const DEFAULT_MEASUREMENT: &str = "ess_telemetry_t";

/// Complete configuration file contents
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Source host reached over SSH (export side)
    pub source: SourceConfig,
    /// Local download location
    pub local: LocalConfig,
    /// Target store for re-ingestion
    pub target: TargetConfig,
    /// Failure alert webhook
    pub alert: AlertConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Remote source host and export settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password auth; ignored when `key_file` is set
    pub password: Option<String>,
    /// Private key for public-key auth
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    /// Source bucket ID passed to `influxd inspect export-lp`
    pub bucket_id: String,
    /// Storage engine root on the remote host
    pub engine_path: String,
    /// Directory on the remote host receiving export artifacts
    pub backup_dir: String,
    /// Run the export through `sudo`
    pub use_sudo: bool,
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: "your_server_ip".to_string(),
            port: 22,
            username: "your_username".to_string(),
            password: None,
            key_file: None,
            key_passphrase: None,
            bucket_id: "your_bucket_id".to_string(),
            engine_path: "/path/to/influxdb/engine/".to_string(),
            backup_dir: "/path/to/remote/backup".to_string(),
            use_sudo: true,
            connect_timeout_secs: 30,
            keepalive_secs: 30,
        }
    }
}

impl SourceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Keepalive interval, never below one second
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}

/// Local host settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Directory receiving downloaded artifacts (never pruned)
    pub backup_dir: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/path/to/local/backup"),
        }
    }
}

/// Target store settings used by `influx write` / `influx query`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target server URL
    pub host: String,
    pub org: String,
    pub token: String,
    pub bucket: String,
    /// Measurement counted before and after ingestion
    pub measurement: String,
    /// `influx` CLI binary (name on PATH or absolute path)
    pub influx_bin: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "http://your_influxdb_server:8086".to_string(),
            org: PLACEHOLDER_ORG.to_string(),
            token: PLACEHOLDER_TOKEN.to_string(),
            bucket: PLACEHOLDER_BUCKET.to_string(),
            measurement: DEFAULT_MEASUREMENT.to_string(),
            influx_bin: "influx".to_string(),
        }
    }
}

impl TargetConfig {
    /// Names of required fields that are empty or still hold their placeholder
    pub fn unset_fields(&self) -> Vec<&'static str> {
        let checks = [
            ("org", self.org.as_str(), PLACEHOLDER_ORG),
            ("token", self.token.as_str(), PLACEHOLDER_TOKEN),
            ("bucket", self.bucket.as_str(), PLACEHOLDER_BUCKET),
        ];

        checks
            .iter()
            .filter(|(_, value, placeholder)| value.trim().is_empty() || value == placeholder)
            .map(|(name, _, _)| *name)
            .collect()
    }
}

/// Failure alert webhook
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub webhook_url: String,
    /// First line of every alert message
    pub title: String,
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=your_webhook_key"
                .to_string(),
            title: "InfluxDB daily backup failed".to_string(),
            timeout_secs: 10,
        }
    }
}

impl AlertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    pub level: String,

    /// Log file path (appended); stderr only if not specified
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("influx_export_download.log")),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply secret overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply secret overrides from an arbitrary lookup (empty values ignored)
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(password) = non_empty(ENV_SSH_PASSWORD) {
            self.source.password = Some(password);
        }
        if let Some(token) = non_empty(ENV_INFLUX_TOKEN) {
            self.target.token = token;
        }
        if let Some(url) = non_empty(ENV_WEBHOOK_URL) {
            self.alert.webhook_url = url;
        }
    }
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

/// Loaded configuration plus its origin (logged once tracing is up)
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: TomlConfig,
    pub source: ConfigSource,
}

/// Candidate config files searched when no explicit path is given
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("ifxb").join("config.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/ifxb/config.toml"));
    }
    paths
}

/// Resolve the config file path
///
/// An explicit path (CLI or environment) is returned as-is even if missing,
/// so that a typo surfaces as an error instead of silently using defaults.
/// Searched paths are only returned when they exist.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    search: &[PathBuf],
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3/4: well-known locations
    search.iter().find(|p| p.exists()).cloned()
}

/// Resolve, read and finalize the configuration
pub fn load_config(cli_arg: Option<&Path>) -> Result<LoadedConfig> {
    let resolved = resolve_config_path(cli_arg, ENV_CONFIG_PATH, &search_paths());

    let (mut config, source) = match resolved {
        Some(path) => (TomlConfig::load(&path)?, ConfigSource::File(path)),
        None => (TomlConfig::default(), ConfigSource::Defaults),
    };
    config.apply_env_overrides();

    Ok(LoadedConfig { config, source })
}
