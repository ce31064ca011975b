//! # Wire Messages
//!
//! Everything that crosses a process boundary.
//!
//! ## Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Message Families                               │
//! │                                                                         │
//! │  PEER LINK (terminal ◄──► terminal)                                    │
//! │  ──────────────────────────────────                                    │
//! │  Both ───► REQUEST_SYNC                    "send me what you have"     │
//! │  Both ───► INVENTORY_UPDATE [products...]  full snapshot, replaces     │
//! │                                                                         │
//! │  LOCAL TABS (same process, same named channel)                         │
//! │  ─────────────────────────────────────────────                         │
//! │  Tab  ───► { type: INVENTORY_UPDATE, payload, timestamp }              │
//! │                                                                         │
//! │  RENDEZVOUS (terminal ◄──► broker)                                     │
//! │  ─────────────────────────────────                                     │
//! │  Claim   { id, addr }  ──► Claimed | Taken                             │
//! │  Resolve { id }        ──► Resolved { addr } | Unknown                 │
//! │  Release { id }        ──► Released                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON. A peer message looks like
//! ```json
//! { "type": "INVENTORY_UPDATE", "payload": [ { "barcode": "100101", ... } ] }
//! ```
//! and `REQUEST_SYNC` carries no payload at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use discreet_core::Snapshot;

use crate::error::{SyncError, SyncResult};
use crate::identity::PeerId;

/// Message kind shared by the peer link and the local-tab channel.
pub const INVENTORY_UPDATE: &str = "INVENTORY_UPDATE";

/// Largest frame accepted on a peer link or broker socket.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

// =============================================================================
// Peer Link Messages
// =============================================================================

/// Messages exchanged over an open peer link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SyncMessage {
    /// Full replacement inventory.
    #[serde(rename = "INVENTORY_UPDATE")]
    InventorySnapshot(Snapshot),

    /// Asks the other side to send its current snapshot.
    #[serde(rename = "REQUEST_SYNC")]
    SyncRequest,
}

impl SyncMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncMessage::InventorySnapshot(_) => INVENTORY_UPDATE,
            SyncMessage::SyncRequest => "REQUEST_SYNC",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}

// =============================================================================
// Local Tab Envelope
// =============================================================================

/// What one tab posts to its siblings on a named channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEnvelope {
    #[serde(rename = "type")]
    pub kind: String,

    pub payload: Snapshot,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl LocalEnvelope {
    pub fn inventory_update(payload: Snapshot) -> Self {
        LocalEnvelope {
            kind: INVENTORY_UPDATE.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn is_inventory_update(&self) -> bool {
        self.kind == INVENTORY_UPDATE
    }
}

// =============================================================================
// Rendezvous Broker Messages
// =============================================================================

/// Requests and replies on a broker socket.
///
/// Every request gets exactly one reply, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BrokerMessage {
    /// Registers `id` at `addr` for as long as this socket stays open.
    Claim { id: PeerId, addr: SocketAddr },
    Claimed { id: PeerId },
    /// Someone else holds the identifier.
    Taken { id: PeerId },

    Resolve { id: PeerId },
    Resolved { id: PeerId, addr: SocketAddr },
    Unknown { id: PeerId },

    Release { id: PeerId },
    Released { id: PeerId },

    /// The request could not be understood.
    Error { message: String },
}

impl BrokerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            BrokerMessage::Claim { .. } => "Claim",
            BrokerMessage::Claimed { .. } => "Claimed",
            BrokerMessage::Taken { .. } => "Taken",
            BrokerMessage::Resolve { .. } => "Resolve",
            BrokerMessage::Resolved { .. } => "Resolved",
            BrokerMessage::Unknown { .. } => "Unknown",
            BrokerMessage::Release { .. } => "Release",
            BrokerMessage::Released { .. } => "Released",
            BrokerMessage::Error { .. } => "Error",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }
}
