//! # discreet-sync: Replication Layer for the Discreet Terminal
//!
//! Keeps every copy of the inventory in step. There is no server of record:
//! each terminal holds the whole snapshot and replicates it wholesale.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Replication Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  Terminal (application controller)               │  │
//! │  │                                                                  │  │
//! │  │  Owns the InventoryStore, persists every change, fans local      │  │
//! │  │  mutations out and feeds inbound snapshots back in               │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ LocalTabChannel│  │   PeerMesh     │  │   HostedSync           │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Same-process   │  │ WebSocket link │  │ Rows keyed by store    │    │
//! │  │ fan-out on a   │  │ per peer pair, │  │ code, change feed      │    │
//! │  │ named channel  │  │ full snapshots │  │ triggers re-fetch      │    │
//! │  └────────────────┘  └───────┬────────┘  └────────────────────────┘    │
//! │                              │                                          │
//! │                     ┌────────┴─────────┐                                │
//! │                     │  PeerDirectory   │  identifier ──► address        │
//! │                     │  memory / broker │  (BrokerServer never sees      │
//! │                     └──────────────────┘   inventory)                   │
//! │                                                                         │
//! │  CONSISTENCY: last full snapshot wins. No versions, no merge.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`terminal`] - `Terminal` controller and its event emitter
//! - [`config`] - Terminal configuration (TOML + `DISCREET_*` env)
//! - [`error`] - Sync error types
//! - [`protocol`] - Wire messages for peers, local tabs and the broker
//! - [`local`] - Local-tab broadcast channel
//! - [`mesh`] - Peer mesh endpoint and link supervisor
//! - [`directory`] - Identifier directory (in-memory or broker-backed)
//! - [`broker`] - Rendezvous broker server
//! - [`hosted`] - Hosted store client
//! - [`identity`] - Peer identifiers and store codes
//! - [`subscription`] - Cancellable listener handles
//!
//! ## Usage
//!
//! ```rust,ignore
//! use discreet_sync::{ChannelEmitter, LocalBus, Terminal, TerminalConfig};
//! use discreet_core::ScanMode;
//!
//! let config = TerminalConfig::load_or_default(None);
//! let (emitter, mut events) = ChannelEmitter::new();
//!
//! let terminal = Terminal::from_config(&config, &LocalBus::new(), emitter).await?;
//! terminal.scan("100101", ScanMode::Sell).await?;
//!
//! if let Some(code) = terminal.peer_id().await {
//!     println!("Connection code: {code}");
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod broker;
pub mod config;
pub mod directory;
pub mod error;
pub mod hosted;
pub mod identity;
pub mod local;
pub mod mesh;
pub mod protocol;
pub mod subscription;
pub mod terminal;

mod link;

// =============================================================================
// Re-exports
// =============================================================================

pub use broker::{BrokerConfig, BrokerHandle, BrokerServer, DEFAULT_BROKER_PORT};
pub use config::{SyncMode, TerminalConfig};
pub use directory::{BrokerDirectory, BrokerDirectoryConfig, MemoryDirectory, PeerDirectory};
pub use error::{SyncError, SyncResult};
pub use hosted::HostedSync;
pub use identity::{PeerId, StoreCode};
pub use link::LinkDirection;
pub use local::{LocalBus, LocalTabChannel, DEFAULT_CHANNEL_NAME};
pub use mesh::{MeshConfig, MeshEvent, MeshHandle, MeshState, MeshStatus, PeerMesh};
pub use protocol::{BrokerMessage, LocalEnvelope, SyncMessage};
pub use subscription::Subscription;
pub use terminal::{
    ChangeSource, ChannelEmitter, CustomerView, NoOpEmitter, Terminal, TerminalBuilder,
    TerminalEvent, TerminalEventEmitter, TerminalStatus,
};
