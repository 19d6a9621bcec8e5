//! Inbound request handling.
//!
//! # Responsibilities
//! - Map the public path onto the upstream target URL
//! - Work out the origin the client used to reach the proxy
//! - Prepare the header set forwarded upstream
//!
//! # Design Decisions
//! - Hop-by-hop headers are never forwarded
//! - `Host` always names the upstream origin
//! - Upstream bodies are requested uncompressed so HTML can be rewritten

use axum::http::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, HOST};
use axum::http::Uri;
use url::Url;

use crate::error::ProxyError;
use crate::http::response::is_hop_by_hop;
use crate::rewrite::RewriteConfig;

pub const X_REQUEST_ID: &str = "x-request-id";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Build the upstream URL for an inbound request.
///
/// The part of the path after `local_prefix` is appended to
/// `origin + origin_path`; a path outside the prefix maps to the upstream
/// root. The query string is carried over.
pub fn build_target_url(uri: &Uri, cfg: &RewriteConfig) -> Result<Url, ProxyError> {
    let suffix = strip_local_prefix(uri.path(), cfg.local_prefix()).unwrap_or("");
    let query = uri.query().map(|q| format!("?{}", q)).unwrap_or_default();

    let target = format!(
        "{}{}{}{}",
        cfg.origin().as_str().trim_end_matches('/'),
        cfg.origin_path(),
        suffix,
        query
    );

    Url::parse(&target).map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", target, e)))
}

/// Path remainder after `prefix`, matching on whole segments.
fn strip_local_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Scheme and host the client used, e.g. `https://mirror.example`.
pub fn request_origin(headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = headers
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());

    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| "localhost".to_string());

    format!("{}://{}", scheme, host)
}

/// Headers to send upstream, derived from the inbound set.
pub fn upstream_headers(inbound: &HeaderMap, cfg: &RewriteConfig, strip: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || *name == HOST
            || *name == ACCEPT_ENCODING
            || strip.iter().any(|s| s.eq_ignore_ascii_case(name.as_str()))
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Ok(host) = HeaderValue::from_str(cfg.origin_host()) {
        headers.insert(HOST, host);
    }
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    headers
}
