//! Proxy error taxonomy.
//!
//! Only failures that end a response live here. URL parse failures and
//! malformed cookies are recovered where they happen by leaving the value
//! unrewritten.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced to the client by the dispatcher.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream fetch failed entirely.
    #[error("Upstream fetch failed: {0}")]
    UpstreamUnavailable(String),

    /// The upstream did not answer before the request timeout.
    #[error("Upstream timed out after {0} seconds")]
    UpstreamTimeout(u64),

    /// The upstream target URL could not be built from the inbound request.
    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),

    /// The upstream body failed part way through streaming.
    #[error("Upstream body failed: {0}")]
    UpstreamBody(String),

    /// The HTML tokenizer rejected the document part way through.
    #[error("HTML rewrite failed: {0}")]
    Rewrite(String),
}

impl ProxyError {
    /// Status code returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable(_) | ProxyError::UpstreamBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::Rewrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnavailable(_) => "unavailable",
            ProxyError::UpstreamTimeout(_) => "timeout",
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::UpstreamBody(_) => "body",
            ProxyError::Rewrite(_) => "rewrite",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
