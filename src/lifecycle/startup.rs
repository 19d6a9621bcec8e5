//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the rewrite configuration from the validated config
//! - Start the metrics endpoint when enabled
//! - Bind the listener and hand it to the HTTP server
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use tokio::net::TcpListener;

use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::metrics;

/// Run the proxy until a shutdown signal arrives.
pub async fn run(config: ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = HttpServer::new(config)?;
    let config = server.config();

    tracing::info!(
        origin = %config.upstream.origin,
        origin_path = %config.upstream.origin_path,
        local_prefix = %config.upstream.local_prefix,
        host_rules = config.host_map.len(),
        cookie_rules = config.cookie_domains.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;
    signal_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
