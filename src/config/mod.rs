use crate::alarm::{MonitoredWidget, Severity};
use crate::broker::BrokerConnectionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Complete frostline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrostlineConfig {
    #[serde(default)]
    pub broker: BrokerConnectionConfig,
    #[serde(default)]
    pub alarms: AlarmsConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    /// Initial monitored widget snapshot
    #[serde(default)]
    pub widgets: Vec<MonitoredWidget>,
}

/// Alarm persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlarmsConfig {
    /// SQLite file for alarm records; in-memory store when unset
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Severity stamped on new alarm records
    #[serde(default)]
    pub default_severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Cached state older than this is reported when merged into a command
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_stale_after_secs() -> u64 {
    30
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl CommandsConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// HTTP / WebSocket surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl FrostlineConfig {
    /// Apply `FROSTLINE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FROSTLINE_BROKER_URL") {
            self.broker.url = v;
        }
        if let Some(v) = lookup("FROSTLINE_BROKER_USERNAME") {
            self.broker.username = Some(v);
        }
        if let Some(v) = lookup("FROSTLINE_BROKER_PASSWORD") {
            self.broker.password = Some(v);
        }
        if let Some(v) = lookup("FROSTLINE_API_BIND") {
            self.api.bind = v;
        }
        if let Some(v) = lookup("FROSTLINE_ALARM_DB") {
            self.alarms.database = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<FrostlineConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: FrostlineConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Config path from `FROSTLINE_CONFIG`, else the first CLI argument
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var_os("FROSTLINE_CONFIG")
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
}

/// Load the effective configuration: file (if present) plus environment overrides.
///
/// A missing file is not an error; defaults are used.
pub fn load(path: Option<&Path>) -> Result<FrostlineConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading configuration");
            load_config(path)?
        }
        Some(path) => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            FrostlineConfig::default()
        }
        None => FrostlineConfig::default(),
    };

    config.apply_env_overrides();
    Ok(config)
}
