use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid min_stable_ms: {0}. Must be positive")]
    InvalidMinStable(u64),

    #[error(
        "Invalid stabilization window: max_stabilization_wait_ms ({0}) must be at least min_stable_ms ({1})"
    )]
    InvalidStabilizationWindow(u64, u64),

    #[error("Invalid {0}: must be at least 1")]
    ZeroLimit(&'static str),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Lease key prefix cannot be empty")]
    EmptyKeyPrefix,

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .capture-fusion/config.yaml (project config)
    /// 3. .capture-fusion/local.yaml (local overrides, optional)
    /// 4. Environment variables (CAPTURE_FUSION_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".capture-fusion/config.yaml"))
            .merge(Yaml::file(".capture-fusion/local.yaml"))
            .merge(Env::prefixed("CAPTURE_FUSION_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("CAPTURE_FUSION_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// `load_from_file` when a path is given, `load` otherwise
    pub fn resolve(path: Option<&std::path::Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let readiness = &config.readiness;
        if readiness.min_stable_ms == 0 {
            return Err(ConfigError::InvalidMinStable(readiness.min_stable_ms));
        }
        if readiness.max_stabilization_wait_ms < readiness.min_stable_ms {
            return Err(ConfigError::InvalidStabilizationWindow(
                readiness.max_stabilization_wait_ms,
                readiness.min_stable_ms,
            ));
        }

        let limits = [
            ("tracker.max_attempts", config.tracker.max_attempts as u64),
            ("engine.max_resolutions", config.engine.max_resolutions as u64),
            ("lease.max_entries", config.lease.max_entries as u64),
            ("lease.ttl_ms", config.lease.ttl_ms),
            ("retry.retry_delay_ms", config.retry.retry_delay_ms),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroLimit(*name));
        }

        if config.retry.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.retry.max_retries));
        }

        if config.lease.key_prefix.is_empty() {
            return Err(ConfigError::EmptyKeyPrefix);
        }
        if config.lease.database_path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}
