//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidMessage         │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  Configuration- │  │  Timeout        │  │  DeserializationFailed  │ │
//! │  │    Missing      │  │  WebSocketError │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Identity      │  │  Hosted store   │  │      Inventory          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Identifier-    │  │  StoreNotFound  │  │  Core (NotFound, CSV,   │ │
//! │  │    Collision    │  │  Database       │  │        PIN)             │ │
//! │  │  Registration-  │  │  Storage        │  │                         │ │
//! │  │    Failed       │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use discreet_core::CoreError;
use discreet_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure the replication layer can report.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid broker or database URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// An optional backend was used without being configured.
    ///
    /// Raised before any network call is made.
    #[error("{0} is not configured")]
    ConfigurationMissing(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// A peer or the broker could not be reached, or the handshake never
    /// completed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("Disconnected")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Identity Errors
    // =========================================================================
    /// The directory already holds this identifier.
    #[error("Identifier already taken: {0}")]
    IdentifierCollision(String),

    /// Every registration attempt collided.
    #[error("Could not register a peer identifier after {attempts} attempts")]
    RegistrationFailed { attempts: u32 },

    /// The directory has no entry for this identifier.
    #[error("Unknown peer: {0}")]
    PeerNotFound(String),

    /// Malformed peer identifier or store code.
    #[error("Invalid code '{code}': {reason}")]
    InvalidCode { code: String, reason: String },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid message received.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Failed to serialize message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Hosted Store Errors
    // =========================================================================
    /// No rows exist for this store code.
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    /// Hosted database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Local snapshot file failure.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    /// Inventory rule failure (unknown barcode, bad CSV, wrong PIN).
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Component is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Io(msg) | DbError::Corrupt(msg) => SyncError::Storage(msg),
            DbError::ConnectionFailed(msg) => SyncError::ConnectionFailed(msg),
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the same operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
                | SyncError::IdentifierCollision(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
                | SyncError::ConfigurationMissing(_)
        )
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMessage(_)
                | SyncError::SerializationFailed(_)
                | SyncError::DeserializationFailed(_)
        )
    }

    /// Returns true for the "barcode not found" notice.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Core(e) if e.is_not_found())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(10).is_retryable());
        assert!(SyncError::IdentifierCollision("discreet-1234".into()).is_retryable());

        assert!(!SyncError::RegistrationFailed { attempts: 8 }.is_retryable());
        assert!(!SyncError::ConfigurationMissing("hosted store".into()).is_retryable());
    }

    #[test]
    fn test_configuration_missing_is_config_error() {
        let err = SyncError::ConfigurationMissing("Hosted store".into());
        assert!(err.is_config_error());
        assert_eq!(err.to_string(), "Hosted store is not configured");
    }

    #[test]
    fn test_db_errors_split_into_storage_and_database() {
        let storage: SyncError = DbError::Corrupt("bad json".into()).into();
        assert!(matches!(storage, SyncError::Storage(_)));

        let db: SyncError = DbError::QueryFailed("boom".into()).into();
        assert!(matches!(db, SyncError::Database(_)));
    }

    #[test]
    fn test_not_found_passes_through() {
        let err: SyncError = CoreError::ProductNotFound("42".into()).into();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Product not found: 42");
    }
}
