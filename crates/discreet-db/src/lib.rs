//! # discreet-db: Storage Layer
//!
//! Everything that touches disk or the hosted database.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          discreet-db                                    │
//! │                                                                         │
//! │  ┌───────────────────────┐     ┌────────────────────────────────────┐  │
//! │  │ SnapshotFile          │     │ RowStore (trait)                   │  │
//! │  │                       │     │                                    │  │
//! │  │ inventory.json        │     │  upsert_rows(code, products)       │  │
//! │  │ load → Snapshot       │     │  fetch_rows(code)                  │  │
//! │  │ save ← Snapshot       │     │  watch(code) → ChangeFeed          │  │
//! │  │ (absent/corrupt →     │     │                                    │  │
//! │  │  caller's fallback)   │     │  ├── InventoryRepository (Postgres)│  │
//! │  └───────────────────────┘     │  └── MemoryRowStore (tests, demo)  │  │
//! │                                └────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod rows;
pub mod snapshot_file;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{HostedDatabase, HostedDbConfig};
pub use repository::inventory::InventoryRepository;
pub use repository::memory::MemoryRowStore;
pub use rows::{ChangeFeed, InventoryRow, RowStore};
pub use snapshot_file::SnapshotFile;
