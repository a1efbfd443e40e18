//! Configuration management for callgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{CallgateError, Result};
use crate::ratelimit::{Policy, DEFAULT_DELAY};

/// Top-level configuration, as loaded by the `callgate` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallgateConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for a single rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window length in milliseconds. Signed so that a negative value in a
    /// file is reported instead of failing to parse.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: i64,

    /// Policy applied to calls
    #[serde(default)]
    pub policy: Policy,

    /// Name used in log output
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            policy: Policy::default(),
            name: None,
        }
    }
}

fn default_delay_ms() -> i64 {
    DEFAULT_DELAY.as_millis() as i64
}

impl LimiterConfig {
    /// The configured window length.
    pub fn delay(&self) -> Result<Duration> {
        u64::try_from(self.delay_ms)
            .map(Duration::from_millis)
            .map_err(|_| {
                CallgateError::InvalidConfig(format!(
                    "delay_ms must be non-negative, got {}",
                    self.delay_ms
                ))
            })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl CallgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CallgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CallgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot be used.
    pub fn validate(&self) -> Result<()> {
        self.limiter.delay()?;
        Ok(())
    }
}
