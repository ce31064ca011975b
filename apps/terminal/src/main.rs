//! # Discreet Terminal
//!
//! Headless staff terminal. Reads barcodes and commands from stdin.
//!
//! ## Usage
//! ```bash
//! # Defaults: mesh mode, no broker, platform config and data directories
//! cargo run -p discreet-terminal
//!
//! # Custom config file
//! cargo run -p discreet-terminal -- --config ./terminal.toml
//!
//! # Two terminals on one machine through a local broker
//! DISCREET_BROKER_URL=ws://127.0.0.1:9470/broker cargo run -p discreet-terminal
//! ```
//!
//! ## Environment
//! Every `DISCREET_*` variable understood by [`TerminalConfig`] applies, and
//! `RUST_LOG` sets the log filter (default `info`).

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use discreet_core::{ScanMode, Snapshot};
use discreet_sync::{ChangeSource, LocalBus, Terminal, TerminalConfig, TerminalEventEmitter};

use crate::commands::{Command, HELP};

// =============================================================================
// Event Output
// =============================================================================

/// Writes terminal events to the log.
struct LogEmitter;

impl TerminalEventEmitter for LogEmitter {
    fn emit_inventory(&self, snapshot: &Snapshot, source: &ChangeSource) {
        let units: u64 = snapshot.iter().map(|p| u64::from(p.stock)).sum();
        info!(?source, products = snapshot.len(), units, "Inventory updated");
    }

    fn emit_connection(&self, connected: bool, open_links: usize) {
        info!(connected, open_links, "Peer connection changed");
    }

    fn emit_notice(&self, message: &str) {
        info!("{message}");
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        warn!(retryable, "{message}");
    }
}

// =============================================================================
// Session
// =============================================================================

/// Per-operator state of the staff face.
struct Session {
    terminal: Terminal,
    unlocked: bool,
    mode: ScanMode,
}

impl Session {
    /// Runs one command. Returns false when the operator quits.
    async fn run(&mut self, command: Command) -> bool {
        let result = match command {
            Command::Empty => Ok(()),
            Command::Quit => return false,
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Barcode(barcode) if self.unlocked => self.scan(&barcode, self.mode).await,
            Command::Barcode(barcode) | Command::Lookup(barcode) => self.lookup(&barcode),
            Command::Unlock(pin) => self.terminal.unlock(&pin).map(|()| {
                self.unlocked = true;
                println!("Staff face unlocked ({:?} mode)", self.mode);
            }),
            Command::Lock => {
                self.unlocked = false;
                Ok(())
            }
            Command::Stats => {
                let stats = self.terminal.stats();
                println!("{} units, {} items", stats.total_units, stats.unique_items);
                Ok(())
            }
            Command::Status => {
                let status = self.terminal.status().await;
                match serde_json::to_string_pretty(&status) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!(error = %e, "Could not render status"),
                }
                Ok(())
            }
            Command::Connect(code) => self.terminal.connect_peer(&code).await.map(|linked| {
                if let Some(peer) = linked {
                    println!("Linked with {peer}");
                }
            }),
            staff if !self.unlocked => {
                println!("Locked. Use `unlock <pin>` first ({staff:?} refused)");
                Ok(())
            }
            Command::SetMode(mode) => {
                self.mode = mode;
                println!("Scan mode: {mode:?}");
                Ok(())
            }
            Command::Scan { barcode, mode } => self.scan(&barcode, mode).await,
            Command::Import(path) => self.import(&path).await,
            Command::Export(path) => self.export(&path).await,
            Command::CreateStore => self.terminal.create_hosted_store().await.map(|code| {
                println!("Store code: {code}");
            }),
            Command::AttachStore(code) => self
                .terminal
                .attach_hosted_store(&code)
                .await
                .map(|code| println!("Following store {code}")),
            Command::DetachStore => {
                self.terminal.detach_hosted_store().await;
                Ok(())
            }
            Command::RefreshStore => self.terminal.refresh_hosted().await,
        };

        if let Err(e) = result {
            println!("{e}");
        }
        true
    }

    async fn scan(&self, barcode: &str, mode: ScanMode) -> discreet_sync::SyncResult<()> {
        let next = self.terminal.scan(barcode, mode).await?;
        if let Some(product) = next.find(barcode.trim()) {
            println!(
                "{} {} {}: {} in stock",
                product.description, product.color_name, product.size, product.stock
            );
        }
        Ok(())
    }

    fn lookup(&self, barcode: &str) -> discreet_sync::SyncResult<()> {
        let view = self.terminal.lookup(barcode)?;
        println!(
            "{} ({}) {} {}",
            view.product.description, view.product.item_code, view.product.color_name, view.product.price
        );
        for size in &view.sizes {
            println!("  {:>4}  {} in stock", size.size, size.stock);
        }
        if !view.other_colors.is_empty() {
            println!("  also in: {}", view.other_colors.join(", "));
        }
        Ok(())
    }

    async fn import(&self, path: &str) -> discreet_sync::SyncResult<()> {
        let text = tokio::fs::read_to_string(path).await?;
        let summary = self.terminal.import_csv(&text).await?;
        println!(
            "Imported: {} updated, {} added, {} skipped",
            summary.updated, summary.added, summary.skipped
        );
        Ok(())
    }

    async fn export(&self, path: &str) -> discreet_sync::SyncResult<()> {
        tokio::fs::write(path, self.terminal.export_csv()).await?;
        println!("Exported to {path}");
        Ok(())
    }
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = TerminalConfig::load(config_path_from_args())
        .context("failed to load terminal configuration")?;
    info!(device = %config.device.name, mode = %config.mode(), "Starting Discreet terminal");

    let bus = LocalBus::new();
    let terminal = Terminal::from_config(&config, &bus, Arc::new(LogEmitter))
        .await
        .context("failed to start terminal")?;

    if let Some(id) = terminal.peer_id().await {
        println!("Connection code: {id}");
    }
    println!("Type `help` for commands.");

    let mut session = Session {
        terminal: terminal.clone(),
        unlocked: false,
        mode: ScanMode::default(),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(command) => {
                        if !session.run(command).await {
                            break;
                        }
                    }
                    Err(message) => println!("{message}"),
                }
            }
            _ = shutdown_signal() => break,
        }
    }

    terminal.shutdown().await;
    info!("Terminal shutdown complete");
    Ok(())
}

/// `--config <path>` if given.
fn config_path_from_args() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG=debug` shows per-message sync traffic.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discreet_sync=info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Shutdown signal received");
}
