//! Resolved rewrite configuration and per-request context.

use regex::{Regex, RegexBuilder};
use url::Url;

use crate::config::loader::ConfigError;
use crate::config::schema::{CookieDomainMapping, ProxyConfig};
use crate::config::validation::ValidationError;

/// A compiled `host_map` entry.
#[derive(Debug, Clone)]
pub struct HostRule {
    /// Hostname matched exactly or as a parent domain.
    pub from: String,
    /// Replacement host.
    pub to: String,
    /// `^(https?://)<from>` anchored case-insensitively, used for `Location`.
    location_pattern: Regex,
}

impl HostRule {
    fn new(from: &str, to: &str) -> Result<Self, regex::Error> {
        let location_pattern = RegexBuilder::new(&format!("^(https?://){}", regex::escape(from)))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            location_pattern,
        })
    }

    /// True when `host` equals the key or is a subdomain of it.
    pub fn matches_host(&self, host: &str) -> bool {
        domain_matches(host, &self.from)
    }

    /// Replace the scheme+host prefix of `value` if it starts with this rule's host.
    pub fn replace_prefix(&self, value: &str) -> Option<String> {
        let caps = self.location_pattern.captures(value)?;
        let whole = caps.get(0)?;
        let scheme = caps.get(1)?.as_str();
        Some(format!("{}{}{}", scheme, self.to, &value[whole.end()..]))
    }
}

/// The immutable rewrite configuration, resolved once at startup.
///
/// Every rewrite component reads this; none mutate it. Shared between
/// requests behind an `Arc`.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    origin: Url,
    origin_host: String,
    origin_path: String,
    local_prefix: String,
    host_map: Vec<HostRule>,
    cookie_domains: Vec<CookieDomainMapping>,
}

impl RewriteConfig {
    /// Resolve the rewrite tables out of a validated [`ProxyConfig`].
    pub fn resolve(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let invalid = |field: &str, message: String| {
            ConfigError::Validation(vec![ValidationError::new(field, message)])
        };

        let origin = Url::parse(&config.upstream.origin)
            .map_err(|e| invalid("upstream.origin", e.to_string()))?;
        let origin_host = url_host(&origin)
            .ok_or_else(|| invalid("upstream.origin", "must include a host".to_string()))?;

        let host_map = config
            .host_map
            .iter()
            .enumerate()
            .map(|(i, m)| {
                HostRule::new(&m.from, &m.to)
                    .map_err(|e| invalid(&format!("host_map[{}].from", i), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            origin,
            origin_host,
            origin_path: config.upstream.origin_path.clone(),
            local_prefix: config.upstream.local_prefix.clone(),
            host_map,
            cookie_domains: config.cookie_domains.clone(),
        })
    }

    /// Scheme and host of the upstream.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Host (with non-default port) of the upstream, lowercase.
    pub fn origin_host(&self) -> &str {
        &self.origin_host
    }

    pub fn origin_path(&self) -> &str {
        &self.origin_path
    }

    pub fn local_prefix(&self) -> &str {
        &self.local_prefix
    }

    pub fn host_map(&self) -> &[HostRule] {
        &self.host_map
    }

    pub fn cookie_domains(&self) -> &[CookieDomainMapping] {
        &self.cookie_domains
    }

    /// First `host_map` rule matching `host`, in declaration order.
    pub fn lookup_host(&self, host: &str) -> Option<&HostRule> {
        self.host_map.iter().find(|rule| rule.matches_host(host))
    }

    /// Replacement for a cookie domain, in declaration order.
    pub fn lookup_cookie_domain(&self, domain: &str) -> Option<&str> {
        self.cookie_domains
            .iter()
            .find(|m| domain_matches(domain, &m.from))
            .map(|m| m.to.as_str())
    }

    /// Replacement configured for the upstream host itself, used when the
    /// cookie's own domain matches nothing.
    pub fn origin_cookie_domain(&self) -> Option<&str> {
        self.cookie_domains
            .iter()
            .find(|m| m.from == self.origin_host)
            .map(|m| m.to.as_str())
    }
}

/// Per-request state built by the dispatcher. Lives for one request/response cycle.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Scheme and host the client used to reach the proxy (e.g. "https://mirror.test").
    pub request_origin: String,
    /// The upstream URL this request was forwarded to.
    pub target: Option<Url>,
}

impl RequestContext {
    pub fn new(request_origin: impl Into<String>) -> Self {
        Self {
            request_origin: request_origin.into().trim_end_matches('/').to_string(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: Url) -> Self {
        self.target = Some(target);
        self
    }
}

/// `host[:port]` of a URL, omitting the scheme's default port.
pub fn url_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// `candidate == key` or `candidate` ends with `.key`.
pub fn domain_matches(candidate: &str, key: &str) -> bool {
    candidate == key
        || (candidate.len() > key.len()
            && candidate.ends_with(key)
            && candidate.as_bytes()[candidate.len() - key.len() - 1] == b'.')
}
