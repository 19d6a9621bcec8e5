//! Domain-masking rewrite proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request        ┌──────────────────────────────────────────────┐
//!     ──────────────────────┼─▶ http::server ──▶ http::request ──▶ reqwest ─┼──▶ Upstream
//!                           │                                              │    origin
//!     Client Response       │        rewrite::headers ◀── rewrite::cookie  │
//!     ◀─────────────────────┼── rewrite::html (text/html only) ◀───────────┼───
//!                           │                                              │
//!                           │  config · observability · lifecycle          │
//!                           └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use rewrite_proxy::config::resolve_config;
use rewrite_proxy::lifecycle::startup;
use rewrite_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "rewrite-proxy")]
#[command(about = "Serve an upstream site under this host's domain and path prefix", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long, env = "REWRITE_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = resolve_config(cli.config.as_deref())?;

    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    init_logging(&config.observability);
    tracing::info!("rewrite-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    startup::run(config).await
}
