//! Orchestrator configuration parser.
//!
//! A single [`Config`] value is loaded once (from TOML or defaults) and
//! handed to each component constructor. Every field has a default, so an
//! empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
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

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub orchestration: OrchestrationConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/upgrader"),
        }
    }
}

/// Orchestration-level knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Worker count used when a request does not name one.
    pub default_workers: u32,
    /// Deadline for a whole orchestration, measured from driver start.
    pub timeout_secs: u64,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            default_workers: 1,
            timeout_secs: 24 * 60 * 60,
            default_page_size: 100,
            max_page_size: 1000,
        }
    }
}

impl OrchestrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Step executor retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-step deadline unless the step overrides it.
    pub step_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Upward jitter factor applied to every backoff sleep (0.0 - 1.0).
    pub backoff_jitter: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 2 * 60 * 60,
            backoff_base_secs: 10,
            backoff_cap_secs: 10 * 60,
            backoff_jitter: 0.1,
        }
    }
}

impl ExecutorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the orchestrator misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestration.default_workers == 0 {
            return Err(ConfigError::Invalid(
                "orchestration.default_workers must be at least 1".to_string(),
            ));
        }
        if self.orchestration.default_page_size == 0
            || self.orchestration.default_page_size > self.orchestration.max_page_size
        {
            return Err(ConfigError::Invalid(format!(
                "orchestration.default_page_size must be in 1..={}",
                self.orchestration.max_page_size
            )));
        }
        if self.executor.backoff_base_secs > self.executor.backoff_cap_secs {
            return Err(ConfigError::Invalid(
                "executor.backoff_base_secs exceeds executor.backoff_cap_secs".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.executor.backoff_jitter) {
            return Err(ConfigError::Invalid(
                "executor.backoff_jitter must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}
