//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the upstream origin is a bare http(s) scheme+host
//! - Check path prefixes and lookup table keys are well formed
//! - Validate value ranges (timeouts > 0, capacities > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g. "upstream.origin").
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    pub(crate) fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_origin(&config.upstream.origin, &mut errors);
    validate_prefix("upstream.origin_path", &config.upstream.origin_path, &mut errors);
    validate_prefix("upstream.local_prefix", &config.upstream.local_prefix, &mut errors);

    for (i, mapping) in config.host_map.iter().enumerate() {
        validate_key(&format!("host_map[{}].from", i), &mapping.from, &mut errors);
        if mapping.to.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("host_map[{}].to", i),
                "replacement host must not be empty",
            ));
        }
    }

    for (i, mapping) in config.cookie_domains.iter().enumerate() {
        validate_key(&format!("cookie_domains[{}].from", i), &mapping.from, &mut errors);
    }

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.stream.channel_capacity == 0 {
        errors.push(ValidationError::new("stream.channel_capacity", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_origin(origin: &str, errors: &mut Vec<ValidationError>) {
    let url = match Url::parse(origin) {
        Ok(url) => url,
        Err(e) => {
            errors.push(ValidationError::new("upstream.origin", format!("not a valid URL: {}", e)));
            return;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        errors.push(ValidationError::new("upstream.origin", "scheme must be http or https"));
    }
    if url.host_str().is_none() {
        errors.push(ValidationError::new("upstream.origin", "must include a host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        errors.push(ValidationError::new(
            "upstream.origin",
            "must be scheme and host only; use upstream.origin_path for a path",
        ));
    }
}

fn validate_prefix(field: &str, prefix: &str, errors: &mut Vec<ValidationError>) {
    if !prefix.is_empty() && !prefix.starts_with('/') {
        errors.push(ValidationError::new(field, "must be empty or start with '/'"));
    }
}

fn validate_key(field: &str, key: &str, errors: &mut Vec<ValidationError>) {
    if key.trim().is_empty() {
        errors.push(ValidationError::new(field, "must not be empty"));
    } else if key.contains("://") {
        errors.push(ValidationError::new(field, "must be a bare hostname without a scheme"));
    } else if key.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push(ValidationError::new(field, "must be lowercase"));
    }
}
