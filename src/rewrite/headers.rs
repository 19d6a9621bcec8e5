//! Response header rewriting.
//!
//! # Responsibilities
//! - Rewrite `Location` onto the public site or through `host_map`
//! - Drop `Content-Security-Policy` for HTML bodies
//! - Normalize `Set-Cookie` into one line per cookie and fix each domain
//! - Best-effort URL rewrite of every other header on non-HTML responses
//!
//! # Design Decisions
//! - `Location` uses a string-anchored scheme+host replacement, narrower
//!   than the general URL rewrite
//! - Cookie order is preserved; one header value per cookie line
//! - A value that cannot be represented as a header is left unrewritten

use std::sync::LazyLock;

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, LOCATION, SET_COOKIE};
use regex::{Captures, Regex};

use crate::rewrite::context::{RequestContext, RewriteConfig};
use crate::rewrite::cookie::fix_cookie;
use crate::rewrite::url::{is_same_site, local_url, rewrite_meta_content, rewrite_url};

const CONTENT_SECURITY_POLICY: &str = "content-security-policy";
const LINK: &str = "link";
const REFRESH: &str = "refresh";

/// `<uri-reference>` inside a `Link` header value.
static LINK_TARGET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<([^>]*)>").expect("static regex"));

/// Content-type gate for the HTML body path.
pub fn is_html_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// Whether a header map declares an HTML body.
pub fn has_html_body(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_html_content_type)
}

/// Collect every `Set-Cookie` value as one line per cookie.
///
/// Values folded into a single header with line breaks are split apart.
/// Values that are not UTF-8 are skipped here and passed through untouched
/// by [`rewrite_response_headers`].
pub fn extract_set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(cookie_text)
        .flat_map(split_cookie_lines)
        .collect()
}

/// Cookie values may carry UTF-8, which `HeaderValue::to_str` rejects.
fn cookie_text(value: &HeaderValue) -> Option<&str> {
    std::str::from_utf8(value.as_bytes()).ok()
}

/// Split a possibly folded `Set-Cookie` value on line breaks.
pub fn split_cookie_lines(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

/// Rewrite a `Location` header value.
///
/// Relative values resolve against the upstream origin. Same-site targets
/// move under the local prefix with the first occurrence of `origin_path`
/// removed from the path, wherever it occurs. Anything else only gets its
/// leading scheme+host swapped by the first matching `host_map` entry.
pub fn rewrite_location(location: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    let resolved = match cfg.origin().join(location) {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!(location = %location, error = %e, "Leaving unparseable Location unchanged");
            return location.to_string();
        }
    };

    if is_same_site(&resolved, cfg) {
        let origin_path = cfg.origin_path();
        let path = if origin_path.is_empty() {
            resolved.path().to_string()
        } else {
            resolved.path().replacen(origin_path, "", 1)
        };
        return local_url(&path, &resolved, ctx, cfg);
    }

    cfg.host_map()
        .iter()
        .find_map(|rule| rule.replace_prefix(location))
        .unwrap_or_else(|| location.to_string())
}

/// Produce the outbound header set from the upstream headers.
///
/// `cookies` are the raw `Set-Cookie` lines (see [`extract_set_cookies`]).
/// Returns the final headers, with the fixed cookies appended in order, and
/// the fixed cookie lines themselves.
pub fn rewrite_response_headers(
    mut headers: HeaderMap,
    cookies: Vec<String>,
    ctx: &RequestContext,
    cfg: &RewriteConfig,
) -> (HeaderMap, Vec<String>) {
    let is_html = has_html_body(&headers);

    if let Some(location) = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    {
        let rewritten = rewrite_location(&location, ctx, cfg);
        if rewritten != location {
            tracing::debug!(from = %location, to = %rewritten, "Rewrote Location");
            set_value(&mut headers, LOCATION, &rewritten);
        }
    }

    if is_html {
        headers.remove(CONTENT_SECURITY_POLICY);
    }

    let opaque: Vec<HeaderValue> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter(|v| cookie_text(v).is_none())
        .cloned()
        .collect();
    headers.remove(SET_COOKIE);
    let fixed: Vec<String> = cookies.iter().map(|line| fix_cookie(line, cfg)).collect();

    if !is_html {
        rewrite_generic_headers(&mut headers, ctx, cfg);
    }

    for line in &fixed {
        match HeaderValue::from_str(line) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => tracing::warn!(cookie = %line, "Dropping unrepresentable Set-Cookie line"),
        }
    }
    for value in opaque {
        tracing::debug!("Passing through non-UTF-8 Set-Cookie value");
        headers.append(SET_COOKIE, value);
    }

    (headers, fixed)
}

/// Rewrite every header other than `Location` and `Set-Cookie` in place.
fn rewrite_generic_headers(headers: &mut HeaderMap, ctx: &RequestContext, cfg: &RewriteConfig) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| **name != LOCATION && **name != SET_COOKIE)
        .cloned()
        .collect();

    for name in names {
        let mut changed = false;
        let values: Vec<HeaderValue> = headers
            .get_all(&name)
            .iter()
            .map(|value| {
                let Ok(original) = value.to_str() else {
                    return value.clone();
                };
                let rewritten = rewrite_header_value(&name, original, ctx, cfg);
                if rewritten == original {
                    return value.clone();
                }
                match HeaderValue::from_str(&rewritten) {
                    Ok(v) => {
                        changed = true;
                        v
                    }
                    Err(_) => value.clone(),
                }
            })
            .collect();

        if changed {
            headers.remove(&name);
            for value in values {
                headers.append(name.clone(), value);
            }
        }
    }
}

fn rewrite_header_value(name: &HeaderName, value: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    match name.as_str() {
        LINK => LINK_TARGET
            .replace_all(value, |caps: &Captures| format!("<{}>", rewrite_url(&caps[1], ctx, cfg)))
            .into_owned(),
        REFRESH => rewrite_meta_content(value, ctx, cfg),
        _ => rewrite_url(value, ctx, cfg),
    }
}

fn set_value(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!(header = %name, value = %value, "Rewritten value is not a valid header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{CookieDomainMapping, HostMapping, ProxyConfig};

    fn config(origin_path: &str) -> RewriteConfig {
        let mut config = ProxyConfig::default();
        config.upstream.origin = "https://upstream.test".into();
        config.upstream.origin_path = origin_path.into();
        config.upstream.local_prefix = "/a".into();
        config.host_map = vec![HostMapping::new("github.com", "facebook.com")];
        config.cookie_domains = vec![CookieDomainMapping::new("x.com", "youtube.com")];
        RewriteConfig::resolve(&config).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new("https://mirror.test")
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_html_content_type() {
        assert!(is_html_content_type("text/html; charset=utf-8"));
        assert!(is_html_content_type("TEXT/HTML"));
        assert!(!is_html_content_type("application/json"));
    }

    #[test]
    fn test_location_same_site() {
        let cfg = config("/app");
        assert_eq!(
            rewrite_location("https://upstream.test/app/login?next=1#x", &ctx(), &cfg),
            "https://mirror.test/a/login?next=1#x"
        );
        assert_eq!(rewrite_location("/app/home", &ctx(), &cfg), "https://mirror.test/a/home");
    }

    #[test]
    fn test_location_origin_path_removed_anywhere_in_path() {
        // The first occurrence is removed even when it is not a prefix.
        let cfg = config("/app");
        assert_eq!(
            rewrite_location("https://upstream.test/docs/app/page", &ctx(), &cfg),
            "https://mirror.test/a/docs/page"
        );
    }

    #[test]
    fn test_location_host_map_is_prefix_anchored() {
        let cfg = config("");
        assert_eq!(
            rewrite_location("https://GitHub.com/login", &ctx(), &cfg),
            "https://facebook.com/login"
        );
        // Subdomains are not matched by the anchored replacement.
        assert_eq!(
            rewrite_location("https://api.github.com/x", &ctx(), &cfg),
            "https://api.github.com/x"
        );
        assert_eq!(rewrite_location("https://other.test/", &ctx(), &cfg), "https://other.test/");
    }

    #[test]
    fn test_extract_set_cookies_splits_folded_lines() {
        let map = headers(&[("set-cookie", "a=1; Path=/"), ("set-cookie", "b=2")]);
        assert_eq!(extract_set_cookies(&map), vec!["a=1; Path=/", "b=2"]);

        let folded: Vec<String> = split_cookie_lines("a=1\r\n  b=2; domain=x.com\n").collect();
        assert_eq!(folded, vec!["a=1", "b=2; domain=x.com"]);
    }

    #[test]
    fn test_undecodable_cookies_are_kept() {
        let cfg = config("");
        let mut map = HeaderMap::new();
        map.append(SET_COOKIE, HeaderValue::from_bytes(b"name=caf\xc3\xa9; Domain=x.com").unwrap());
        map.append(SET_COOKIE, HeaderValue::from_bytes(b"latin=\xe9; Path=/").unwrap());
        map.append(SET_COOKIE, HeaderValue::from_static("b=2; Path=/"));

        let cookies = extract_set_cookies(&map);
        assert_eq!(cookies, vec!["name=caf\u{e9}; Domain=x.com", "b=2; Path=/"]);

        let (out, fixed) = rewrite_response_headers(map, cookies, &ctx(), &cfg);
        assert_eq!(fixed, vec!["name=caf\u{e9}; Domain=youtube.com", "b=2; Path=/"]);

        let set: Vec<&[u8]> = out.get_all(SET_COOKIE).iter().map(|v| v.as_bytes()).collect();
        assert_eq!(
            set,
            vec![
                "name=caf\u{e9}; Domain=youtube.com".as_bytes(),
                b"b=2; Path=/".as_slice(),
                b"latin=\xe9; Path=/".as_slice(),
            ]
        );
    }

    #[test]
    fn test_html_response_drops_csp_and_fixes_cookies() {
        let cfg = config("");
        let map = headers(&[
            ("content-type", "text/html"),
            ("content-security-policy", "default-src 'self'"),
            ("content-location", "/index.html"),
            ("set-cookie", "a=1; domain=x.com; Path=/"),
            ("set-cookie", "b=2; domain=elsewhere.test"),
        ]);
        let cookies = extract_set_cookies(&map);

        let (out, fixed) = rewrite_response_headers(map, cookies, &ctx(), &cfg);

        assert!(out.get("content-security-policy").is_none());
        // Generic rewriting is skipped for HTML.
        assert_eq!(out.get("content-location").unwrap(), "/index.html");
        assert_eq!(fixed, vec!["a=1; domain=youtube.com; Path=/", "b=2"]);
        let set: Vec<&str> = out.get_all(SET_COOKIE).iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(set, vec!["a=1; domain=youtube.com; Path=/", "b=2"]);
    }

    #[test]
    fn test_non_html_response_rewrites_generic_headers() {
        let cfg = config("");
        let map = headers(&[
            ("content-type", "application/json"),
            ("content-security-policy", "default-src 'self'"),
            ("content-location", "https://upstream.test/data.json"),
            ("link", "<https://github.com/app.css>; rel=preload, </font.woff2>; rel=preload"),
            ("x-mirror", "https://github.com/x"),
            ("cache-control", "max-age=0"),
            ("location", "https://upstream.test/next"),
        ]);

        let (out, fixed) = rewrite_response_headers(map, Vec::new(), &ctx(), &cfg);

        assert!(fixed.is_empty());
        assert_eq!(out.get("content-security-policy").unwrap(), "default-src 'self'");
        assert_eq!(out.get("content-location").unwrap(), "https://mirror.test/a/data.json");
        assert_eq!(
            out.get("link").unwrap(),
            "<https://facebook.com/app.css>; rel=preload, </a/font.woff2>; rel=preload"
        );
        assert_eq!(out.get("x-mirror").unwrap(), "https://facebook.com/x");
        assert_eq!(out.get("cache-control").unwrap(), "max-age=0");
        assert_eq!(out.get("location").unwrap(), "https://mirror.test/a/next");
    }
}
