//! # Error Types
//!
//! Domain-specific error types for discreet-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  discreet-core errors (this file)                                      │
//! │  ├── CoreError        - Inventory rule failures (NotFound, CSV)        │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  discreet-db errors                                                    │
//! │  └── DbError          - Snapshot file / hosted row store failures      │
//! │                                                                         │
//! │  discreet-sync errors                                                  │
//! │  └── SyncError        - Transport, config and hosted sync failures     │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → operator notice       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Inventory rule failures.
///
/// These are user-facing notices, never system faults: the snapshot is left
/// untouched whenever one of them is returned.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scanned barcode does not exist in the current snapshot.
    ///
    /// ## User Workflow
    /// ```text
    /// Scan "999999"
    ///      │
    ///      ▼
    /// adjust_stock → no matching barcode
    ///      │
    ///      ▼
    /// ProductNotFound("999999")  (snapshot unchanged)
    ///      │
    ///      ▼
    /// Staff face flashes "barcode not found"
    /// ```
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// CSV text could not be turned into any product rows.
    #[error("Invalid CSV: {reason}")]
    InvalidCsv { reason: String },

    /// Staff PIN did not match.
    #[error("Incorrect PIN")]
    IncorrectPin,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Returns true for the not-found notice raised by a scan.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::ProductNotFound(_))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., whitespace inside a barcode).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Numeric value is negative where it must not be.
    #[error("{field} must not be negative")]
    Negative { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
