//! Rewriting subsystem: makes the upstream site appear to be served from
//! the proxy's own domain and path prefix.
//!
//! # Data Flow
//! ```text
//! upstream response
//!     → headers.rs (Location, CSP, generic headers)
//!         → cookie.rs (Set-Cookie domain per line)
//!     → is_html_content_type?
//!         yes → html.rs (streaming attribute rewrite) → client
//!         no  → body passes through untouched        → client
//!
//! url.rs (classify + rewrite one URL) is used by all of the above.
//! ```
//!
//! # Design Decisions
//! - `RewriteConfig` is resolved once and shared read-only across requests
//! - `RequestContext` carries the inbound origin; nothing reads global state
//! - Every failure degrades to leaving that one value unrewritten

pub mod context;
pub mod cookie;
pub mod headers;
pub mod html;
pub mod url;

pub use context::{RequestContext, RewriteConfig};
pub use cookie::fix_cookie;
pub use headers::{extract_set_cookies, is_html_content_type, rewrite_location, rewrite_response_headers};
pub use html::{rewrite_html, transform_html_body, HtmlRewriteStage};
pub use url::{classify, rewrite_url, rewrite_url_list, UrlClass};
