//! Domain-masking rewrite proxy.
//!
//! Fronts a single upstream site and rewrites redirects, cookie domains and
//! URLs in HTML attributes and headers so the site appears to be served
//! from the proxy's own domain and path prefix.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rewrite;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rewrite::{RequestContext, RewriteConfig};
