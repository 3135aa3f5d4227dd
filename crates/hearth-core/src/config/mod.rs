//! # Hearth Runtime Configuration
//!
//! [`RuntimeConfig`] carries supervisor timings, manager concurrency bounds and
//! operator grants applied after load. Every field has a default, so an empty
//! document (or no file at all) yields a working configuration.
pub mod format;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::constants::{
    DEFAULT_BREACH_GRACE_TICKS, DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_MAX_PARALLEL_STARTS,
    DEFAULT_MONITOR_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_STARTUP_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS,
    MIN_BREACH_GRACE_TICKS,
};
use crate::permission::Capability;

pub use format::ConfigFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported file format for '{}'", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{}' as {format}: {message}", path.display())]
    Parse {
        path: PathBuf,
        format: ConfigFormat,
        message: String,
    },

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Timings applied to every plugin supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub startup_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub monitor_interval_ms: u64,
    pub breach_grace_ticks: u32,
    pub request_timeout_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            breach_grace_ticks: DEFAULT_BREACH_GRACE_TICKS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl SupervisorSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// Plugins started concurrently inside one dependency layer
    pub max_parallel_starts: usize,
    pub command_queue_depth: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_parallel_starts: DEFAULT_MAX_PARALLEL_STARTS,
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        }
    }
}

/// An operator grant applied once its plugin is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConfig {
    pub plugin: String,
    pub capability: Capability,
    #[serde(default = "default_granted_by")]
    pub granted_by: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_granted_by() -> String {
    "config".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub manifest_dir: Option<PathBuf>,
    pub supervisor: SupervisorSettings,
    pub manager: ManagerSettings,
    pub grants: Vec<GrantConfig>,
}

impl RuntimeConfig {
    /// Parse a configuration document already read into memory
    pub fn from_str_with_format(data: &str, format: ConfigFormat, origin: &Path) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = format.decode(data, origin)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file, picking the format by extension
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::require(path)?;
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_str_with_format(&data, format, path)?;
        log::info!("Loaded runtime configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("supervisor.startup_timeout_ms", self.supervisor.startup_timeout_ms),
            ("supervisor.stop_timeout_ms", self.supervisor.stop_timeout_ms),
            ("supervisor.monitor_interval_ms", self.supervisor.monitor_interval_ms),
            ("supervisor.request_timeout_ms", self.supervisor.request_timeout_ms),
            ("manager.max_parallel_starts", self.manager.max_parallel_starts as u64),
            ("manager.command_queue_depth", self.manager.command_queue_depth as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.supervisor.breach_grace_ticks < MIN_BREACH_GRACE_TICKS {
            return Err(ConfigError::Invalid {
                field: "supervisor.breach_grace_ticks".to_string(),
                message: format!("must be at least {} so a single spike is tolerated", MIN_BREACH_GRACE_TICKS),
            });
        }
        for grant in &self.grants {
            if grant.plugin.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "grants.plugin".to_string(),
                    message: "plugin name must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}
