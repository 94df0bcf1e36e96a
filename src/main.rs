//! Wormhole gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────── GATEWAY ─────────────────────────┐
//!                     │                                                          │
//!  HTTP request ──────┼─▶ tunnel handler ──▶ relay session (SERVER) ──┐          │
//!                     │        ▲                                      ▼          │
//!                     │    correlator ◀──────────────────────── hub (/wormholeWs)│
//!  HTTP response ◀────┼────────┘                                      ▲          │
//!                     │                      blob store ◀── PUT ──────┼──────────┼─── wormhole client
//!                     │                                               └──────────┼──▶ (CLIENT socket)
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use wormhole::config::load_from_env_or;
use wormhole::lifecycle::{wait_for_signal, Shutdown};
use wormhole::observability::{logging, metrics};
use wormhole::HttpServer;

#[derive(Parser)]
#[command(name = "wormhole-gateway")]
#[command(about = "Public gateway and WebSocket hub for wormhole tunnels", long_about = None)]
struct Cli {
    /// TOML config file. Defaults to $WORMHOLE_CONFIG, then built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let cli = Cli::parse();

    let config = load_from_env_or(cli.config.as_deref())?;
    logging::init_logging(&config.observability);

    tracing::info!("wormhole-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        hub_path = %config.hub.path,
        response_timeout_secs = config.relay.response_timeout_secs,
        request_timeout_secs = config.timeouts.request_secs,
        blob_root = %config.blob.root_dir,
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

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            shutdown.trigger();
        }
    });

    HttpServer::new(config).run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
