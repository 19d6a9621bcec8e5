//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (request ID, tracing, timeout, concurrency limit)
//! - Forward each request to the upstream origin
//! - Hand the upstream response to the rewriting subsystem
//! - Stream the (possibly rewritten) body back to the client

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_LENGTH, Method, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::http::request::{build_target_url, request_origin, upstream_headers, X_REQUEST_ID};
use crate::http::response::{build_response, strip_hop_by_hop};
use crate::lifecycle::shutdown::ShutdownListener;
use crate::observability::metrics;
use crate::rewrite::headers::has_html_body;
use crate::rewrite::{extract_set_cookies, rewrite_response_headers, transform_html_body, RequestContext, RewriteConfig};

/// Errors raised while constructing the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub rewrite: Arc<RewriteConfig>,
    pub client: reqwest::Client,
    pub strip_request_headers: Arc<Vec<String>>,
    pub request_timeout: Duration,
    pub channel_capacity: usize,
}

/// HTTP server for the rewriting proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let rewrite = Arc::new(RewriteConfig::resolve(&config)?);

        // Redirects are rewritten and handed to the client, never followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()?;

        let state = AppState {
            rewrite,
            client,
            strip_request_headers: Arc::new(config.upstream.strip_request_headers.clone()),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            channel_capacity: config.stream.channel_capacity,
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections));

        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware)
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            origin = %self.config.upstream.origin,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.recv())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();

    match forward(&state, request).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Upstream error");
            metrics::record_upstream_error(e.kind());
            metrics::record_request(&method, e.status().as_u16(), start_time);
            e.into_response()
        }
    }
}

/// Forward one request upstream and rewrite the response.
async fn forward(state: &AppState, request: Request<Body>) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();

    let target = build_target_url(&parts.uri, &state.rewrite)?;
    let ctx = Arc::new(
        RequestContext::new(request_origin(&parts.headers, &parts.uri)).with_target(target.clone()),
    );

    tracing::debug!(
        target = %target,
        request_origin = %ctx.request_origin,
        "Proxying request"
    );

    let mut upstream_request = state
        .client
        .request(parts.method.clone(), target)
        .headers(upstream_headers(&parts.headers, &state.rewrite, &state.strip_request_headers));

    if parts.method != Method::GET && parts.method != Method::HEAD {
        upstream_request = upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = match tokio::time::timeout(state.request_timeout, upstream_request.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) if e.is_timeout() => return Err(ProxyError::UpstreamTimeout(state.request_timeout.as_secs())),
        Ok(Err(e)) => return Err(ProxyError::UpstreamUnavailable(e.to_string())),
        Err(_) => return Err(ProxyError::UpstreamTimeout(state.request_timeout.as_secs())),
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let cookies = extract_set_cookies(&upstream_headers);

    let (mut headers, fixed_cookies) = rewrite_response_headers(upstream_headers, cookies, &ctx, &state.rewrite);
    strip_hop_by_hop(&mut headers);
    metrics::record_cookies(fixed_cookies.len());

    let body = if has_html_body(&headers) {
        headers.remove(CONTENT_LENGTH);
        metrics::record_html_rewrite();
        tracing::debug!(status = %status, "Rewriting HTML body");
        Body::from_stream(transform_html_body(
            upstream.bytes_stream(),
            ctx,
            state.rewrite.clone(),
            state.channel_capacity,
        ))
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    Ok(build_response(status, headers, body))
}
