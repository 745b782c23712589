use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, GatewayMode};
use crate::services::redaction::TRUNCATION_MARKER;

/// Project configuration file, created by the operator
pub const PROJECT_CONFIG_PATH: &str = ".mcp-ledger/config.yaml";
/// Optional local overrides on top of the project configuration
pub const LOCAL_CONFIG_PATH: &str = ".mcp-ledger/local.yaml";
/// Prefix for environment overrides; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "MCP_LEDGER_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Legacy mode requires gateway.upstream_url")]
    MissingUpstreamUrl,

    #[error("Invalid upstream_url '{0}': must start with http:// or https://")]
    InvalidUpstreamUrl(String),

    #[error("Invalid {0}: must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("Invalid max_payload_bytes: {0}. Must be at least {1}")]
    PayloadBudgetTooSmall(usize, usize),

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
    /// 2. .mcp-ledger/config.yaml
    /// 3. .mcp-ledger/local.yaml (optional)
    /// 4. Environment variables (MCP_LEDGER_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(PROJECT_CONFIG_PATH))
            .merge(Yaml::file(LOCAL_CONFIG_PATH))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file instead of the project files.
    /// Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from `path` when given, else from the project hierarchy.
    pub fn load_with_override(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.gateway.mode == GatewayMode::Legacy {
            let url = config
                .gateway
                .upstream_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or(ConfigError::MissingUpstreamUrl)?;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUpstreamUrl(url.to_string()));
            }
        }

        if config.gateway.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("request_timeout_ms"));
        }
        if config.gateway.list_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("list_timeout_ms"));
        }
        if config.stdio.shutdown_grace_ms == 0 {
            return Err(ConfigError::ZeroTimeout("shutdown_grace_ms"));
        }

        if config.recording.max_payload_bytes < TRUNCATION_MARKER.len() {
            return Err(ConfigError::PayloadBudgetTooSmall(
                config.recording.max_payload_bytes,
                TRUNCATION_MARKER.len(),
            ));
        }

        if config.recording.redact_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "recording.redact_keys cannot contain empty keys".to_string(),
            ));
        }

        Ok(())
    }
}
