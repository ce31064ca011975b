//! # Validation Module
//!
//! Field checks applied to products that enter the inventory from outside
//! (CSV rows, inbound edits). Snapshots received from peers are trusted as-is.

use crate::error::ValidationError;
use crate::money::Money;
use crate::product::Product;
use crate::MAX_BARCODE_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest description accepted.
const MAX_DESCRIPTION_LEN: usize = 200;

/// Validates a barcode.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_BARCODE_LEN`] characters
/// - No whitespace or control characters inside
///
/// ```rust
/// use discreet_core::validation::validate_barcode;
///
/// assert!(validate_barcode("100101").is_ok());
/// assert!(validate_barcode("").is_err());
/// assert!(validate_barcode("10 01").is_err());
/// ```
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
    if barcode.is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.chars().count() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_BARCODE_LEN,
        });
    }

    if barcode.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must not contain spaces or control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates a price. Zero is allowed.
pub fn validate_price(price: Money) -> ValidationResult<()> {
    if price.is_negative() {
        return Err(ValidationError::Negative {
            field: "price".to_string(),
        });
    }
    Ok(())
}

/// Validates every field of a product that came from outside.
pub fn validate_product(product: &Product) -> ValidationResult<()> {
    validate_barcode(&product.barcode)?;
    validate_price(product.price)?;

    if product.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }

    Ok(())
}
