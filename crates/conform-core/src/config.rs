//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [engine]
//! worker_pool_size = 10
//! lock_wait_timeout_ms = 3600000   # 0 waits forever
//! retained_jobs = 1000             # finished jobs kept for lookup, 0 keeps all
//!
//! [logging]
//! filter = "conform=info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConformConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Jobs that may run at the same time.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Upper bound for blocking lock acquisition at job entry. 0 waits forever.
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub lock_wait_timeout_ms: u64,

    /// Finished jobs kept for `job()` / `counts()`. Oldest are dropped first.
    /// 0 keeps every job.
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
            retained_jobs: default_retained_jobs(),
        }
    }
}

impl EngineConfig {
    pub fn lock_wait_timeout(&self) -> Option<Duration> {
        match self.lock_wait_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "engine.worker_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

// Serde default functions
fn default_worker_pool_size() -> usize {
    10
}

fn default_lock_wait_timeout_ms() -> u64 {
    60 * 60 * 1000
}

fn default_retained_jobs() -> usize {
    1000
}

fn default_log_filter() -> String {
    "conform=info".to_string()
}

impl ConformConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ConformConfig = toml::from_str(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
