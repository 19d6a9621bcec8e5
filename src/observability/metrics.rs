//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): responses by method, status
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_upstream_errors_total` (counter): failed upstream fetches by kind
//! - `proxy_html_rewrites_total` (counter): bodies sent through the HTML rewriter
//! - `proxy_rewritten_cookies_total` (counter): `Set-Cookie` lines processed
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Prometheus endpoint runs on its own listener

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

/// Record a completed proxy response.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record an upstream failure.
pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

/// Record an HTML body routed through the rewriter.
pub fn record_html_rewrite() {
    metrics::counter!("proxy_html_rewrites_total").increment(1);
}

/// Record processed `Set-Cookie` lines.
pub fn record_cookies(count: usize) {
    if count > 0 {
        metrics::counter!("proxy_rewritten_cookies_total").increment(count as u64);
    }
}
