//! Response filter binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │               RESPONSE FILTER                │
//!   Client Request   │  ┌─────────┐   ┌──────────┐   ┌─────────┐    │
//!   ─────────────────┼─▶│  http   │──▶│  filter  │──▶│  proxy  │────┼──▶ Upstream
//!                    │  │ server  │   │middleware│   │ handler │    │
//!                    │  └─────────┘   └────┬─────┘   └─────────┘    │
//!                    │                     │ record / passthrough   │
//!   Client Response  │  ┌─────────┐   ┌────▼─────┐                  │
//!   ◀────────────────┼──│streaming│◀──│  rules   │                  │
//!                    │  │  sink   │   │(rewrite) │                  │
//!                    │  └─────────┘   └──────────┘                  │
//!                    │                                              │
//!                    │  config (+watcher) · observability · signals │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use response_filter::config::{load_config, ConfigWatcher, FilterConfig};
use response_filter::lifecycle::{wait_for_signal, Shutdown};
use response_filter::observability::{logging, metrics};
use response_filter::FilterServer;

#[derive(Parser, Debug)]
#[command(name = "response-filter", version, about = "Buffering response rewriting proxy")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FilterConfig::default(),
    };
    if cli.check {
        println!("configuration OK ({} rules)", config.filter.rules.len());
        return Ok(());
    }

    logging::init_logging(&config.observability)?;
    tracing::info!("response-filter v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        max_buffer_size = config.filter.max_buffer_size,
        rules = config.filter.rules.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = FilterServer::new(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    // Keep the watcher alive for the lifetime of the server.
    let (updates, _watcher) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (updates, Some(watcher.run()?))
        }
        None => (mpsc::unbounded_channel().1, None),
    };

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(listener, updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
