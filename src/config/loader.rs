//! Configuration loading from disk and the environment.
//!
//! Resolution order is defaults < config file < environment variables.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides `upstream.origin`.
pub const ENV_ORIGIN: &str = "REWRITE_PROXY_ORIGIN";
/// Overrides `upstream.origin_path`.
pub const ENV_ORIGIN_PATH: &str = "REWRITE_PROXY_ORIGIN_PATH";
/// Overrides `upstream.local_prefix`.
pub const ENV_LOCAL_PREFIX: &str = "REWRITE_PROXY_LOCAL_PREFIX";
/// Overrides `listener.bind_address`.
pub const ENV_BIND: &str = "REWRITE_PROXY_BIND";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: ProxyConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Resolve the effective configuration: optional file, then environment overrides.
pub fn resolve_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(ConfigError::Parse)?
        }
        None => ProxyConfig::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply environment-style overrides using `lookup` to read variables.
pub fn apply_overrides<F>(config: &mut ProxyConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(origin) = lookup(ENV_ORIGIN) {
        config.upstream.origin = origin;
    }
    if let Some(origin_path) = lookup(ENV_ORIGIN_PATH) {
        config.upstream.origin_path = origin_path;
    }
    if let Some(local_prefix) = lookup(ENV_LOCAL_PREFIX) {
        config.upstream.local_prefix = local_prefix;
    }
    if let Some(bind) = lookup(ENV_BIND) {
        config.listener.bind_address = bind;
    }
}
