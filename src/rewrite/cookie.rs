//! `Set-Cookie` domain rewriting.
//!
//! Only the `Domain` attribute is touched. Every other byte of the cookie
//! line passes through unchanged.

use std::sync::LazyLock;

use regex::Regex;

use crate::rewrite::context::RewriteConfig;

/// `; domain=<value>`, case-insensitive, value up to the next `;`.
static DOMAIN_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(;\s*domain=)([^;]+)").expect("static regex"));

/// What to do with a cookie's `Domain` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainAction<'a> {
    /// Remove the attribute so the cookie is host-only on the serving domain.
    Strip,
    /// Replace the attribute value.
    Replace(&'a str),
}

/// Decide how to treat `domain` (as captured from the cookie line).
///
/// Lookup is ordered first-match over `cookie_domains`, falling back to the
/// entry keyed by the upstream host. Unmapped domains are stripped so the
/// upstream domain never reaches the client.
pub fn resolve_domain<'a>(domain: &str, cfg: &'a RewriteConfig) -> DomainAction<'a> {
    let lookup = domain.trim().to_ascii_lowercase();

    match cfg
        .lookup_cookie_domain(&lookup)
        .or_else(|| cfg.origin_cookie_domain())
    {
        Some("") | None => DomainAction::Strip,
        Some(mapped) => DomainAction::Replace(mapped),
    }
}

/// Rewrite the `Domain` attribute of a single `Set-Cookie` line.
pub fn fix_cookie(line: &str, cfg: &RewriteConfig) -> String {
    let Some(caps) = DOMAIN_ATTR.captures(line) else {
        return line.to_string();
    };
    let (Some(attr), Some(value)) = (caps.get(0), caps.get(2)) else {
        return line.to_string();
    };

    match resolve_domain(value.as_str(), cfg) {
        DomainAction::Strip => {
            tracing::trace!(domain = %value.as_str(), "Stripping cookie domain");
            format!("{}{}", &line[..attr.start()], &line[attr.end()..])
        }
        DomainAction::Replace(mapped) => {
            tracing::trace!(domain = %value.as_str(), mapped = %mapped, "Rewriting cookie domain");
            format!("{}{}{}", &line[..value.start()], mapped, &line[value.end()..])
        }
    }
}
