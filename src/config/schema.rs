//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//!
//! Lookup tables (`host_map`, `cookie_domains`) are TOML arrays of tables
//! rather than TOML tables so that declaration order survives parsing:
//! lookups are first-match in that order.

use serde::{Deserialize, Serialize};

/// Root configuration for the rewriting proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The single upstream site being fronted.
    pub upstream: UpstreamConfig,

    /// Ordered host replacements applied to foreign absolute URLs.
    pub host_map: Vec<HostMapping>,

    /// Ordered cookie domain replacements applied to `Set-Cookie`.
    pub cookie_domains: Vec<CookieDomainMapping>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// HTML streaming pipeline settings.
    pub stream: StreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            upstream: UpstreamConfig::default(),
            host_map: vec![
                HostMapping::new("github.com", "facebook.com"),
                HostMapping::new("google.com", "microsoft.com"),
            ],
            cookie_domains: vec![
                CookieDomainMapping::new("x.com", "youtube.com"),
                CookieDomainMapping::new("discord.com", "tiktok.com"),
            ],
            timeouts: TimeoutConfig::default(),
            stream: StreamConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream origin and the path prefixes mapped between it and the public site.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Scheme and host of the upstream (e.g., "https://example.com").
    pub origin: String,

    /// Upstream path prefix stripped from same-site URLs and prepended to targets.
    pub origin_path: String,

    /// Public path prefix that replaces `origin_path`.
    pub local_prefix: String,

    /// Inbound request headers never forwarded upstream.
    pub strip_request_headers: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "https://expmale.com".to_string(),
            origin_path: String::new(),
            local_prefix: "/a".to_string(),
            strip_request_headers: vec!["cf-connecting-ip".to_string()],
        }
    }
}

/// One `host_map` entry: upstream hostname (exact or parent domain) to replacement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostMapping {
    /// Hostname to replace, optionally with a port.
    pub from: String,
    /// Replacement host.
    pub to: String,
}

impl HostMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// One `cookie_domains` entry. An empty `to` strips the `Domain` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CookieDomainMapping {
    /// Cookie domain to match (exact or parent domain).
    pub from: String,
    /// Replacement domain, or "" to make the cookie host-only.
    #[serde(default)]
    pub to: String,
}

impl CookieDomainMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response headers) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// HTML streaming pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum number of body chunks buffered on each side of the rewriter.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.upstream.local_prefix, "/a");
        assert_eq!(config.host_map.len(), 2);
        assert_eq!(config.stream.channel_capacity, 8);
    }

    #[test]
    fn test_tables_keep_declaration_order() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            origin = "https://upstream.test"

            [[host_map]]
            from = "b.test"
            to = "two.test"

            [[host_map]]
            from = "a.test"
            to = "one.test"

            [[cookie_domains]]
            from = "a.test"
            "#,
        )
        .unwrap();

        assert_eq!(config.host_map[0], HostMapping::new("b.test", "two.test"));
        assert_eq!(config.host_map[1], HostMapping::new("a.test", "one.test"));
        assert_eq!(config.cookie_domains, vec![CookieDomainMapping::new("a.test", "")]);
        assert_eq!(config.upstream.local_prefix, "/a");
    }

    #[test]
    fn test_log_format_parses_lowercase() {
        let config: ProxyConfig = toml::from_str("[observability]\nlog_format = \"json\"").unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
