use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use rewrite_proxy::config::resolve_config;
use rewrite_proxy::rewrite::url::rewrite_url_list;
use rewrite_proxy::rewrite::{fix_cookie, rewrite_html, rewrite_location, rewrite_url, RequestContext, RewriteConfig};

#[derive(Parser)]
#[command(name = "rewrite-cli")]
#[command(about = "Apply the proxy's rewrite rules offline", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long, env = "REWRITE_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Origin the client is assumed to have used to reach the proxy.
    #[arg(short, long, default_value = "http://localhost:8080")]
    request_origin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite a URL as found in an HTML attribute
    Url {
        candidate: String,
        /// Treat the value as a comma-separated srcset list
        #[arg(long)]
        list: bool,
    },
    /// Rewrite a Location header value
    Location { value: String },
    /// Rewrite the Domain attribute of a Set-Cookie line
    Cookie { line: String },
    /// Rewrite an HTML file and print the result
    Html { file: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    let cfg = Arc::new(RewriteConfig::resolve(&config)?);
    let ctx = Arc::new(RequestContext::new(cli.request_origin));

    match cli.command {
        Commands::Url { candidate, list } => {
            let rewritten = if list {
                rewrite_url_list(&candidate, &ctx, &cfg)
            } else {
                rewrite_url(&candidate, &ctx, &cfg)
            };
            println!("{}", rewritten);
        }
        Commands::Location { value } => {
            println!("{}", rewrite_location(&value, &ctx, &cfg));
        }
        Commands::Cookie { line } => {
            println!("{}", fix_cookie(&line, &cfg));
        }
        Commands::Html { file } => {
            let input = std::fs::read(&file)?;
            let output = rewrite_html(&input, cfg, ctx)?;
            print!("{}", String::from_utf8_lossy(&output));
        }
    }

    Ok(())
}
