//! # Scan Mutators
//!
//! What happens when staff scan a barcode.
//!
//! ```text
//!   LOAD  (receiving goods)   stock + 1
//!   SELL  (checkout)          stock - 1, never below zero
//! ```
//!
//! Both are pure snapshot mutators meant to run inside
//! [`InventoryStore::try_apply`](crate::store::InventoryStore::try_apply).

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::product::Snapshot;

/// Direction of a stock scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ScanMode {
    /// Receiving goods: one more unit on the shelf.
    Load,

    /// Checkout: one unit leaves the shelf.
    #[default]
    Sell,
}

impl ScanMode {
    /// Applies this mode to a stock count.
    pub fn adjust(self, stock: u32) -> u32 {
        match self {
            ScanMode::Load => stock.saturating_add(1),
            ScanMode::Sell => stock.saturating_sub(1),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Load => write!(f, "load"),
            ScanMode::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "load" | "in" | "receive" => Ok(ScanMode::Load),
            "sell" | "out" | "sale" => Ok(ScanMode::Sell),
            other => Err(CoreError::Validation(
                crate::error::ValidationError::InvalidFormat {
                    field: "scan mode".to_string(),
                    reason: format!("'{}' is not load or sell", other),
                },
            )),
        }
    }
}

/// Adjusts the stock of `barcode` by one unit in the direction of `mode`.
///
/// Only the matching product changes; every other product and the list
/// order are carried over.
///
/// ## Errors
/// [`CoreError::ProductNotFound`] if no product has this barcode.
///
/// ```rust
/// use discreet_core::{adjust_stock, seed_snapshot, ScanMode};
///
/// let next = adjust_stock(&seed_snapshot(), "100101", ScanMode::Sell).unwrap();
/// assert_eq!(next.find("100101").unwrap().stock, 4);
/// ```
pub fn adjust_stock(current: &Snapshot, barcode: &str, mode: ScanMode) -> CoreResult<Snapshot> {
    let barcode = barcode.trim();
    let index = current
        .position(barcode)
        .ok_or_else(|| CoreError::ProductNotFound(barcode.to_string()))?;

    let mut products = current.to_vec();
    let product = &mut products[index];
    product.stock = mode.adjust(product.stock);

    Ok(Snapshot::new(products))
}

/// Checks the staff PIN.
pub fn verify_pin(entered: &str, expected: &str) -> CoreResult<()> {
    if entered.trim() == expected {
        Ok(())
    } else {
        Err(CoreError::IncorrectPin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::seed_snapshot;
    use crate::store::InventoryStore;

    #[test]
    fn test_load_increments_stock() {
        let store = InventoryStore::new(seed_snapshot());
        let next = store
            .try_apply(|s| adjust_stock(s, "100101", ScanMode::Load))
            .unwrap();

        assert_eq!(next.find("100101").unwrap().stock, 6);
        assert_eq!(next.find("100102").unwrap().stock, 2);
    }

    #[test]
    fn test_sell_never_goes_below_zero() {
        let empty_shelf = seed_snapshot()
            .iter()
            .map(|p| if p.barcode == "100101" { p.with_stock(0) } else { p.clone() })
            .collect::<Snapshot>();
        let store = InventoryStore::new(empty_shelf);

        let next = store
            .try_apply(|s| adjust_stock(s, "100101", ScanMode::Sell))
            .unwrap();

        assert_eq!(next.find("100101").unwrap().stock, 0);
    }

    #[test]
    fn test_unknown_barcode_is_not_found() {
        let snapshot = seed_snapshot();
        let err = adjust_stock(&snapshot, "999999", ScanMode::Sell).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_scanner_whitespace_is_ignored() {
        let next = adjust_stock(&seed_snapshot(), " 100103\n", ScanMode::Sell).unwrap();
        assert_eq!(next.find("100103").unwrap().stock, 0);
    }

    #[test]
    fn test_scan_mode_parsing() {
        assert_eq!("load".parse::<ScanMode>().unwrap(), ScanMode::Load);
        assert_eq!("SELL".parse::<ScanMode>().unwrap(), ScanMode::Sell);
        assert!("other".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_verify_pin() {
        assert!(verify_pin("1234", crate::DEFAULT_STAFF_PIN).is_ok());
        assert!(matches!(
            verify_pin("0000", crate::DEFAULT_STAFF_PIN),
            Err(CoreError::IncorrectPin)
        ));
    }
}
