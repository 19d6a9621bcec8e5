//! Outbound response assembly.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from the upstream response
//! - Assemble the client response from status, headers and body
//!
//! # Design Decisions
//! - Bodies are streamed, never buffered
//! - Upstream status is passed through unchanged

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderName};
use axum::http::StatusCode;
use axum::response::Response;

/// Headers meaningful only for a single transport hop.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Build the response sent to the client.
pub fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
