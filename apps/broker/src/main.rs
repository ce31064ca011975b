//! # Discreet Broker
//!
//! Rendezvous service for peer identifiers.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Rendezvous Broker                                │
//! │                                                                         │
//! │  Terminal ───► ws://host:9470/broker ───► claim table (in memory)       │
//! │                                                                         │
//! │  Terminals then dial each other directly.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Environment
//! - `BROKER_BIND` - listen address (default `0.0.0.0`)
//! - `BROKER_PORT` - listen port (default `9470`)
//! - `RUST_LOG` - log filter (default `info`)

use tracing::info;
use tracing_subscriber::EnvFilter;

use discreet_sync::{BrokerConfig, BrokerServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Discreet rendezvous broker...");

    let config = BrokerConfig::from_env()?;
    info!(bind = %config.bind_address(), "Configuration loaded");

    let broker = BrokerServer::new(config).start().await?;
    info!(url = %broker.url(), "Terminals can register at this URL");

    shutdown_signal().await;

    broker.shutdown().await?;
    info!("Broker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discreet_sync=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
