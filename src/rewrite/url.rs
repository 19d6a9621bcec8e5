//! URL rewrite policy.
//!
//! # Responsibilities
//! - Classify a candidate string into exactly one [`UrlClass`]
//! - Map same-site absolute URLs onto the public origin and local prefix
//! - Replace foreign hosts listed in `host_map`
//! - Prefix root-relative paths with the local prefix
//! - Split `srcset`-style candidate lists and rewrite each candidate
//!
//! # Design Decisions
//! - Pure: output depends only on the input, the request context and config
//! - A URL that cannot be parsed is returned unchanged, never corrupted
//! - Relative paths are left to the browser to resolve

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::rewrite::context::{url_host, RequestContext, RewriteConfig};

/// Scheme prepended to protocol-relative URLs before parsing. Only the host,
/// path, query and fragment take part in rewriting.
const PROTOCOL_RELATIVE_SCHEME: &str = "https:";

/// `<meta http-equiv="refresh" content="5; url=...">`
static META_REFRESH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\s*[0-9.]*\s*[;,]\s*url\s*=\s*)(.*?)\s*$").expect("static regex")
});

/// Shape of a candidate URL string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlClass {
    /// `http://` or `https://`.
    Absolute,
    /// `//host/path`.
    ProtocolRelative,
    /// `/path`.
    RootRelative,
    /// `data:`, `blob:`, `javascript:` or a `#fragment`.
    Opaque,
    /// Anything else, resolved by the browser against the document.
    Relative,
}

/// Classify an already-trimmed candidate.
pub fn classify(candidate: &str) -> UrlClass {
    if candidate.starts_with('#')
        || starts_with_ignore_case(candidate, "data:")
        || starts_with_ignore_case(candidate, "blob:")
        || starts_with_ignore_case(candidate, "javascript:")
    {
        UrlClass::Opaque
    } else if candidate.starts_with("//") {
        UrlClass::ProtocolRelative
    } else if starts_with_ignore_case(candidate, "http://") || starts_with_ignore_case(candidate, "https://") {
        UrlClass::Absolute
    } else if candidate.starts_with('/') {
        UrlClass::RootRelative
    } else {
        UrlClass::Relative
    }
}

/// Rewrite a single URL candidate for the public site.
pub fn rewrite_url(candidate: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    let candidate = candidate.trim();

    match classify(candidate) {
        UrlClass::Opaque | UrlClass::Relative => candidate.to_string(),
        UrlClass::ProtocolRelative => {
            let absolute = format!("{}{}", PROTOCOL_RELATIVE_SCHEME, candidate);
            map_absolute(&absolute, ctx, cfg).unwrap_or(absolute)
        }
        UrlClass::Absolute => map_absolute(candidate, ctx, cfg).unwrap_or_else(|| candidate.to_string()),
        UrlClass::RootRelative => prefix_root_relative(candidate, cfg),
    }
}

/// Rewrite a comma-separated candidate list such as a `srcset` value.
///
/// Each candidate is split on its first whitespace run into URL and
/// descriptor; only the URL is rewritten. A URL containing a comma is not
/// supported. When no candidate changes the input is returned as-is.
pub fn rewrite_url_list(value: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    let mut changed = false;

    let candidates: Vec<String> = value
        .split(',')
        .map(|segment| {
            let segment = segment.trim();
            let (url, descriptor) = match segment.split_once(char::is_whitespace) {
                Some((url, rest)) => (url, rest.trim_start()),
                None => (segment, ""),
            };

            let rewritten = rewrite_url(url, ctx, cfg);
            if rewritten != url {
                changed = true;
            }

            if descriptor.is_empty() {
                rewritten
            } else {
                format!("{} {}", rewritten, descriptor)
            }
        })
        .collect();

    if changed {
        candidates.join(", ")
    } else {
        value.to_string()
    }
}

/// Rewrite a `<meta content>` value.
///
/// The refresh form (`0;url=...`) has only its target rewritten, keeping any
/// quotes around it. Other values go through [`rewrite_url_list`].
pub fn rewrite_meta_content(value: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    let Some(caps) = META_REFRESH.captures(value) else {
        return rewrite_url_list(value, ctx, cfg);
    };
    let (Some(lead), Some(target)) = (caps.get(1), caps.get(2)) else {
        return value.to_string();
    };

    let raw = target.as_str();
    let (open, inner, close) = split_quotes(raw);
    let rewritten = rewrite_url(inner, ctx, cfg);
    if rewritten == inner {
        return value.to_string();
    }

    format!(
        "{}{}{}{}{}",
        lead.as_str(),
        open,
        rewritten,
        close,
        &value[target.end()..]
    )
}

/// Whether an absolute URL string points at the upstream origin.
pub fn is_same_site(url: &Url, cfg: &RewriteConfig) -> bool {
    url_host(url).is_some_and(|host| host == cfg.origin_host())
}

/// `<request origin><local prefix><path><query><fragment>` for a same-site URL,
/// with the `origin_path` prefix already removed from `path` by the caller.
pub fn local_url(path: &str, url: &Url, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
    format!(
        "{}{}{}{}{}",
        ctx.request_origin,
        cfg.local_prefix(),
        path,
        search(url),
        hash(url)
    )
}

fn map_absolute(absolute: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> Option<String> {
    let url = match Url::parse(absolute) {
        Ok(url) => url,
        Err(e) => {
            tracing::trace!(url = %absolute, error = %e, "Leaving unparseable URL unchanged");
            return None;
        }
    };
    let host = url_host(&url)?;

    if host == cfg.origin_host() {
        let path = strip_origin_path(url.path(), cfg);
        return Some(local_url(path, &url, ctx, cfg));
    }

    let rule = cfg.lookup_host(&host)?;
    Some(format!(
        "{}://{}{}{}{}",
        url.scheme(),
        rule.to,
        url.path(),
        search(&url),
        hash(&url)
    ))
}

fn prefix_root_relative(path: &str, cfg: &RewriteConfig) -> String {
    format!("{}{}", cfg.local_prefix(), strip_origin_path(path, cfg))
}

fn strip_origin_path<'a>(path: &'a str, cfg: &RewriteConfig) -> &'a str {
    let origin_path = cfg.origin_path();
    if origin_path.is_empty() {
        return path;
    }
    path.strip_prefix(origin_path).unwrap_or(path)
}

/// `?query`, or "" when the query is absent or empty.
pub(crate) fn search(url: &Url) -> String {
    match url.query() {
        Some(q) if !q.is_empty() => format!("?{}", q),
        _ => String::new(),
    }
}

/// `#fragment`, or "" when the fragment is absent or empty.
pub(crate) fn hash(url: &Url) -> String {
    match url.fragment() {
        Some(f) if !f.is_empty() => format!("#{}", f),
        _ => String::new(),
    }
}

fn split_quotes(raw: &str) -> (&str, &str, &str) {
    for quote in ["'", "\""] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return (quote, &raw[1..raw.len() - 1], quote);
        }
    }
    ("", raw, "")
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}
