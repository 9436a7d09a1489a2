//! Runtime configuration.
//!
//! Values are layered with priority:
//! 1. Environment variables (`LANWATCH_RANGE`, `LANWATCH_DB`)
//! 2. Config file (`~/.config/lanwatch/config.toml`, or an explicit path)
//! 3. Default values

use crate::monitor::MonitorSettings;
use crate::scanner::range::parse_network;
use crate::scanner::{DEFAULT_PROBE_TIMEOUT, MAX_CONCURRENT_PROBES, RangeDescriptor, ScanStrategy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the scan range
pub const ENV_RANGE: &str = "LANWATCH_RANGE";

/// Environment variable overriding the database location
pub const ENV_DB: &str = "LANWATCH_DB";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    scan: Option<ScanSection>,
    monitor: Option<MonitorSection>,
    storage: Option<StorageSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ScanSection {
    /// CIDR block or single address; omitted means the local network
    range: Option<String>,
    /// "lightweight" or "rich"
    strategy: Option<String>,
    probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorSection {
    interval_secs: Option<u64>,
    retry_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageSection {
    database_path: Option<PathBuf>,
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// At least one value came from an environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Effective runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub scan_range: RangeDescriptor,
    pub scan_strategy: ScanStrategy,
    pub scan_probe_timeout: Duration,
    pub monitor: MonitorSettings,
    pub database_path: PathBuf,
    /// Highest-priority source that contributed a value
    pub source: ConfigSource,
    /// The file that was loaded, if any
    pub file_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_range: RangeDescriptor::LocalNetwork,
            scan_strategy: ScanStrategy::Rich,
            scan_probe_timeout: DEFAULT_PROBE_TIMEOUT,
            monitor: MonitorSettings::default(),
            database_path: default_database_path(),
            source: ConfigSource::Default,
            file_path: None,
        }
    }
}

/// Platform data directory location of the status database.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lanwatch")
        .join("lanwatch.db")
}

/// Get the path to the configuration file
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("lanwatch").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/lanwatch/config.toml".to_string())
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load configuration from the environment, a config file and defaults.
///
/// An explicit `path` must exist and parse. The default location is
/// optional, and a broken default file is logged and skipped.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (file, file_path) = match path {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            (Some(read_config_file(path)?), Some(path.to_path_buf()))
        }
        None => match config_file_path().filter(|p| p.exists()) {
            Some(path) => match read_config_file(&path) {
                Ok(file) => {
                    tracing::debug!("Loaded config from {:?}", path);
                    (Some(file), Some(path))
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    (None, None)
                }
            },
            None => (None, None),
        },
    };

    resolve_config(file, file_path, |key| std::env::var(key).ok())
}

fn secs(value: Option<u64>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            key,
            message: "must be at least 1 second".to_string(),
        }),
        Some(v) => Ok(Some(Duration::from_secs(v))),
        None => Ok(None),
    }
}

fn range_value(text: String, key: &'static str) -> Result<RangeDescriptor, ConfigError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("local") {
        return Ok(RangeDescriptor::LocalNetwork);
    }
    parse_network(trimmed).map_err(|e| ConfigError::InvalidValue {
        key,
        message: e.to_string(),
    })?;
    Ok(RangeDescriptor::Explicit(trimmed.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Merge an optional parsed file with environment values over the defaults.
pub fn resolve_config(
    file: Option<ConfigFile>,
    file_path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut from_file = false;

    if let Some(file) = file {
        if let Some(scan) = file.scan {
            if let Some(range) = scan.range {
                config.scan_range = range_value(range, "scan.range")?;
                from_file = true;
            }
            if let Some(strategy) = non_empty(scan.strategy) {
                config.scan_strategy = strategy.parse::<ScanStrategy>().map_err(|message| {
                    ConfigError::InvalidValue {
                        key: "scan.strategy",
                        message,
                    }
                })?;
                from_file = true;
            }
            if let Some(timeout) = secs(scan.probe_timeout_secs, "scan.probe_timeout_secs")? {
                config.scan_probe_timeout = timeout;
                from_file = true;
            }
        }

        if let Some(monitor) = file.monitor {
            if let Some(interval) = secs(monitor.interval_secs, "monitor.interval_secs")? {
                config.monitor.interval = interval;
                from_file = true;
            }
            if let Some(retry) = secs(monitor.retry_secs, "monitor.retry_secs")? {
                config.monitor.retry_delay = retry;
                from_file = true;
            }
            if let Some(timeout) = secs(monitor.probe_timeout_secs, "monitor.probe_timeout_secs")? {
                config.monitor.probe_timeout = timeout;
                from_file = true;
            }
            if let Some(concurrency) = monitor.concurrency {
                config.monitor.concurrency = concurrency.clamp(1, MAX_CONCURRENT_PROBES);
                from_file = true;
            }
        }

        if let Some(path) = file.storage.and_then(|s| s.database_path) {
            config.database_path = path;
            from_file = true;
        }
    }

    let mut from_env = false;

    if let Some(range) = non_empty(env(ENV_RANGE)) {
        tracing::info!("Using scan range from environment variable: {}", range);
        config.scan_range = range_value(range, ENV_RANGE)?;
        from_env = true;
    }

    if let Some(db) = non_empty(env(ENV_DB)) {
        tracing::info!("Using database path from environment variable: {}", db);
        config.database_path = PathBuf::from(db);
        from_env = true;
    }

    config.source = if from_env {
        ConfigSource::Environment
    } else if from_file {
        ConfigSource::ConfigFile
    } else {
        ConfigSource::Default
    };
    config.file_path = file_path;

    Ok(config)
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# lanwatch configuration
# Place this file at: ~/.config/lanwatch/config.toml

[scan]
# CIDR block or single address. Default: inferred from the local network
# range = "192.168.1.0/24"

# "rich" also resolves hardware address and vendor, falling back to
# "lightweight" (ping and reverse DNS only) when the ARP table is unreadable
# strategy = "rich"

# probe_timeout_secs = 2

[monitor]
# Seconds between monitor cycles
# interval_secs = 300

# Seconds to wait after a failed cycle
# retry_secs = 30

# probe_timeout_secs = 3

# Simultaneous probes, 1 to 50
# concurrency = 50

[storage]
# Default: <data dir>/lanwatch/lanwatch.db
# database_path = "/var/lib/lanwatch/lanwatch.db"
"#
    .to_string()
}
