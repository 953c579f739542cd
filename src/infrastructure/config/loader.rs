use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_workers: {0}. Must be between 1 and 64")]
    InvalidMaxWorkers(usize),

    #[error("Invalid scan_interval_seconds: {0}. Must be at least 1")]
    InvalidScanInterval(u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid retry budget: {0}. Cannot be 0")]
    InvalidRetryBudget(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid aging factor: {0}. Must be non-negative")]
    InvalidAgingFactor(f64),

    #[error("Invalid polling configuration: interval ({0}s) must be less than timeout ({1}s)")]
    InvalidPolling(u64, u64),

    #[error("Remote host cannot be empty")]
    EmptyRemoteHost,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .caseflow/config.yaml (project config, created by init)
    /// 3. .caseflow/local.yaml (project local overrides, optional)
    /// 4. Environment variables (CASEFLOW_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.caseflow/) so several
    /// pipelines with different remote hosts can share a machine.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".caseflow/config.yaml"))
            .merge(Yaml::file(".caseflow/local.yaml"))
            .merge(Env::prefixed("CASEFLOW_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_workers == 0 || config.max_workers > 64 {
            return Err(ConfigError::InvalidMaxWorkers(config.max_workers));
        }

        if config.scan_interval_seconds == 0 {
            return Err(ConfigError::InvalidScanInterval(config.scan_interval_seconds));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.budget_per_step == 0 {
            return Err(ConfigError::InvalidRetryBudget(config.retry.budget_per_step));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.scheduler.aging_factor_per_hour < 0.0 {
            return Err(ConfigError::InvalidAgingFactor(
                config.scheduler.aging_factor_per_hour,
            ));
        }

        if config.remote.host.is_empty() {
            return Err(ConfigError::EmptyRemoteHost);
        }

        if config.remote.poll_interval_seconds == 0
            || config.remote.poll_interval_seconds >= config.remote.poll_timeout_seconds
        {
            return Err(ConfigError::InvalidPolling(
                config.remote.poll_interval_seconds,
                config.remote.poll_timeout_seconds,
            ));
        }

        if config.tools.preprocessor.command.is_empty() || config.tools.converter.command.is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "Tool commands cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
