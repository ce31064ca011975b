//! # discreet-core: Pure Inventory Logic
//!
//! The domain heart of the Discreet terminal. Every function here is pure:
//! snapshots go in, snapshots come out, and nothing touches disk or network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Discreet Terminal Architecture                      │
//! │                                                                         │
//! │   Staff face (scan / CSV)          Customer face (lookup)               │
//! │          │                                 │                            │
//! │          ▼                                 ▼                            │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │               ★ discreet-core (THIS CRATE) ★                      │ │
//! │  │                                                                   │ │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐     │ │
//! │  │   │  product  │  │   store   │  │   scan    │  │  catalog  │     │ │
//! │  │   │  Product  │  │ Inventory │  │ ScanMode  │  │ colors /  │     │ │
//! │  │   │  Snapshot │  │  Store    │  │ adjust    │  │ sizes     │     │ │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘     │ │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                    │ │
//! │  │   │   money   │  │    csv    │  │ validation│                    │ │
//! │  │   └───────────┘  └───────────┘  └───────────┘                    │ │
//! │  │                                                                   │ │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS              │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   discreet-db (snapshot file, hosted rows)                              │
//! │   discreet-sync (local tabs, peer mesh, hosted sync)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use discreet_core::{adjust_stock, seed_snapshot, InventoryStore, ScanMode};
//!
//! let store = InventoryStore::new(seed_snapshot());
//!
//! let next = store
//!     .try_apply(|current| adjust_stock(current, "100101", ScanMode::Load))
//!     .unwrap();
//!
//! assert_eq!(next.find("100101").unwrap().stock, 6);
//! assert_eq!(store.current(), next);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod catalog;
pub mod csv;
pub mod error;
pub mod money;
pub mod product;
pub mod scan;
pub mod store;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use catalog::{other_colors, sizes_in_color, stats, InventoryStats};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use product::{seed_snapshot, Product, Snapshot};
pub use scan::{adjust_stock, verify_pin, ScanMode};
pub use store::InventoryStore;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// PIN that unlocks the staff face when no other PIN is configured.
pub const DEFAULT_STAFF_PIN: &str = "1234";

/// Longest barcode accepted from a scanner or a CSV row.
pub const MAX_BARCODE_LEN: usize = 64;
