// crates/core/src/config.rs
//! Job store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Interval between retries of failed job record writes.
pub const DEFAULT_RETRY_FAILURE_INTERVAL_MS: u64 = 600_000;

/// Attempts made by the retry worker before a pending write is dropped.
pub const DEFAULT_MAX_WRITE_RETRIES: u32 = 5;

pub const ENV_JOB_DIR: &str = "SENSORHUB_JOB_DIR";
pub const ENV_RETRY_FAILURE_INTERVAL_MS: &str = "SENSORHUB_RETRY_FAILURE_INTERVAL_MS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Configuration for the job store and its persistence engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub job_dir: PathBuf,
    pub retry_failure_interval_ms: u64,
    pub max_write_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            job_dir: crate::paths::default_job_dir(),
            retry_failure_interval_ms: DEFAULT_RETRY_FAILURE_INTERVAL_MS,
            max_write_retries: DEFAULT_MAX_WRITE_RETRIES,
        }
    }
}

impl StoreConfig {
    pub fn with_job_dir(job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
            ..Self::default()
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_failure_interval_ms)
    }

    /// Apply `SENSORHUB_*` environment overrides, then validate the result.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Reject settings the persistence engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_failure_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retryFailureIntervalMs",
                value: "0 (must be at least 1)".into(),
            });
        }
        Ok(())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup(ENV_JOB_DIR).filter(|d| !d.is_empty()) {
            self.job_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_RETRY_FAILURE_INTERVAL_MS) {
            self.retry_failure_interval_ms =
                ms.parse().map_err(|_| ConfigError::InvalidValue {
                    key: ENV_RETRY_FAILURE_INTERVAL_MS,
                    value: ms.clone(),
                })?;
        }
        self.validate()
    }
}

/// Read a TOML file into any deserializable config section.
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
