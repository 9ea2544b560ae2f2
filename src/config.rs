//! Configuration for the job runner.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [jobs]
//! encoding = "utf-8"
//! status_interval = 2.0
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every section and field is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::storage::{DEFAULT_ENCODING, resolve_encoding};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Text encoding label used when opening local files.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Seconds between status queries for SD card jobs.
    #[serde(default = "default_status_interval")]
    pub status_interval: f64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            status_interval: default_status_interval(),
        }
    }
}

impl JobsConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.status_interval)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_status_interval()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

fn default_status_interval() -> f64 {
    2.0
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if resolve_encoding(&self.jobs.encoding).is_err() {
            return Err(ConfigError::Invalid(format!("unknown encoding '{}'", self.jobs.encoding)));
        }
        if !(self.jobs.status_interval.is_finite() && self.jobs.status_interval > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "status_interval must be a positive number of seconds, got {}",
                self.jobs.status_interval
            )));
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.jobs.encoding, "utf-8");
        assert_eq!(config.jobs.status_interval(), Duration::from_secs(2));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[jobs]\nencoding = \"latin1\"\nstatus_interval = 0.5\n\n[logging]\nlevel = \"debug\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.jobs.encoding, "latin1");
        assert_eq!(config.jobs.status_interval(), Duration::from_millis(500));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config: Config = toml::from_str("[jobs]\nstatus_interval = 0.0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config: Config = toml::from_str("[jobs]\nencoding = \"klingon\"").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_config("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
