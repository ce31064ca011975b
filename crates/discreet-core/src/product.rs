//! # Products and Snapshots
//!
//! A [`Product`] is one sellable variant (one barcode). A [`Snapshot`] is the
//! complete, immutable, ordered product list at one instant.
//!
//! ## Snapshot Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   seed / file ──► Snapshot v1 ──mutator──► Snapshot v2 ──► ...         │
//! │                        │                        │                       │
//! │                        │ (never edited)         ├──► local tabs         │
//! │                        ▼                        ├──► peer mesh          │
//! │                  dropped when the               └──► hosted rows        │
//! │                  last clone goes                                        │
//! │                                                                         │
//! │   Cloning a Snapshot is an Arc bump. Every change builds a new one.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::Arc;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Product
// =============================================================================

/// One sellable size/color variant, keyed by barcode.
///
/// Products sharing an `item_code` are variants of the same style.
/// JSON field names follow the browser UI (`itemCode`, `colorName`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Product {
    /// Unique key within one store's inventory.
    pub barcode: String,

    /// Style code shared by all size/color variants.
    pub item_code: String,

    pub description: String,

    #[ts(type = "number")]
    pub price: Money,

    pub color_code: String,

    pub color_name: String,

    pub size: String,

    /// Units on hand. Never negative.
    #[serde(default)]
    pub stock: u32,
}

impl Product {
    /// Returns a copy of this product with a different stock count.
    pub fn with_stock(&self, stock: u32) -> Self {
        Product {
            stock,
            ..self.clone()
        }
    }

    /// True when both products are variants of the same style and color.
    pub fn same_style_and_color(&self, other: &Product) -> bool {
        self.item_code == other.item_code && self.color_name == other.color_name
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Ordered, immutable product list.
///
/// Serializes as a bare JSON array, which is the persisted and wire shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Arc<Vec<Product>>);

impl Snapshot {
    /// Creates a snapshot that owns `products`, keeping their order.
    pub fn new(products: Vec<Product>) -> Self {
        Snapshot(Arc::new(products))
    }

    /// The empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up a product by barcode.
    pub fn find(&self, barcode: &str) -> Option<&Product> {
        self.0.iter().find(|p| p.barcode == barcode)
    }

    /// Position of a barcode in the list.
    pub fn position(&self, barcode: &str) -> Option<usize> {
        self.0.iter().position(|p| p.barcode == barcode)
    }

    /// Products as an owned vector, for mutators that build the next snapshot.
    pub fn to_vec(&self) -> Vec<Product> {
        self.0.as_ref().clone()
    }

    /// True when both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Snapshot {
    type Target = [Product];

    fn deref(&self) -> &[Product] {
        self.0.as_slice()
    }
}

impl From<Vec<Product>> for Snapshot {
    fn from(products: Vec<Product>) -> Self {
        Snapshot::new(products)
    }
}

impl FromIterator<Product> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Product>>(iter: I) -> Self {
        Snapshot::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Product;
    type IntoIter = std::slice::Iter<'a, Product>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Seed Inventory
// =============================================================================

/// Built-in inventory used when no persisted snapshot is available.
///
/// Three variants of one linen shirt: two sizes in white, one in blue.
pub fn seed_snapshot() -> Snapshot {
    let shirt = |barcode: &str, color_code: &str, color_name: &str, size: &str, stock: u32| Product {
        barcode: barcode.to_string(),
        item_code: "SHIRT-99".to_string(),
        description: "חולצת כפתורים פשתן".to_string(),
        price: Money::from_major_minor(120, 0),
        color_code: color_code.to_string(),
        color_name: color_name.to_string(),
        size: size.to_string(),
        stock,
    };

    Snapshot::new(vec![
        shirt("100101", "10", "לבן", "S", 5),
        shirt("100102", "10", "לבן", "M", 2),
        shirt("100103", "20", "כחול", "L", 1),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_json_uses_ui_field_names() {
        let product = seed_snapshot()[0].clone();
        let json = serde_json::to_value(&product).unwrap();

        assert_eq!(json["barcode"], "100101");
        assert_eq!(json["itemCode"], "SHIRT-99");
        assert_eq!(json["colorName"], "לבן");
        assert_eq!(json["price"], 120);
        assert_eq!(json["stock"], 5);
    }

    #[test]
    fn test_missing_stock_defaults_to_zero() {
        let json = r#"{"barcode":"1","itemCode":"A","description":"d","price":9.5,
                       "colorCode":"1","colorName":"red","size":"M"}"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.stock, 0);
        assert_eq!(product.price.cents(), 950);
    }

    #[test]
    fn test_snapshot_serializes_as_array() {
        let snapshot = seed_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.starts_with('['));

        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = seed_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.position("100103"), Some(2));
        assert!(snapshot.find("nope").is_none());

        let clone = snapshot.clone();
        assert!(clone.ptr_eq(&snapshot));
    }
}
