//! # Catalog Lookups
//!
//! Read-only queries behind the customer face: after a barcode is scanned the
//! screen shows the product, the other sizes in the same color, and the other
//! colors the style comes in.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::product::{Product, Snapshot};

/// Headline numbers for the staff face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InventoryStats {
    /// Sum of stock across all products.
    pub total_units: u64,

    /// Number of distinct barcodes.
    pub unique_items: usize,
}

/// Variants of the same style in the same color (sizes run), including the
/// product itself, in snapshot order.
pub fn sizes_in_color<'a>(snapshot: &'a Snapshot, product: &Product) -> Vec<&'a Product> {
    snapshot
        .iter()
        .filter(|p| p.same_style_and_color(product))
        .collect()
}

/// Distinct color names the style is available in, excluding the product's
/// own color, in first-seen order.
///
/// ```rust
/// use discreet_core::{other_colors, seed_snapshot};
///
/// let snapshot = seed_snapshot();
/// let white = snapshot.find("100101").unwrap();
/// assert_eq!(other_colors(&snapshot, white), vec!["כחול"]);
/// ```
pub fn other_colors<'a>(snapshot: &'a Snapshot, product: &Product) -> Vec<&'a str> {
    let mut colors: Vec<&str> = Vec::new();
    for candidate in snapshot.iter() {
        if candidate.item_code == product.item_code
            && candidate.color_name != product.color_name
            && !colors.contains(&candidate.color_name.as_str())
        {
            colors.push(&candidate.color_name);
        }
    }
    colors
}

/// Total units and distinct barcodes.
pub fn stats(snapshot: &Snapshot) -> InventoryStats {
    InventoryStats {
        total_units: snapshot.iter().map(|p| u64::from(p.stock)).sum(),
        unique_items: snapshot.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::product::seed_snapshot;

    fn variant(barcode: &str, color: &str, size: &str) -> Product {
        Product {
            barcode: barcode.to_string(),
            color_name: color.to_string(),
            size: size.to_string(),
            ..seed_snapshot()[0].clone()
        }
    }

    #[test]
    fn test_other_colors_excludes_own_and_duplicates() {
        let snapshot = Snapshot::new(vec![
            variant("1", "white", "S"),
            variant("2", "blue", "S"),
            variant("3", "blue", "M"),
            variant("4", "black", "L"),
            variant("5", "white", "M"),
        ]);
        let scanned = snapshot.find("1").unwrap();

        assert_eq!(other_colors(&snapshot, scanned), vec!["blue", "black"]);
    }

    #[test]
    fn test_other_colors_ignores_other_styles() {
        let mut other_style = variant("9", "green", "S");
        other_style.item_code = "PANTS-1".to_string();
        let snapshot = Snapshot::new(vec![variant("1", "white", "S"), other_style]);

        assert!(other_colors(&snapshot, &snapshot[0]).is_empty());
    }

    #[test]
    fn test_sizes_in_color() {
        let snapshot = seed_snapshot();
        let white_s = snapshot.find("100101").unwrap();

        let sizes: Vec<&str> = sizes_in_color(&snapshot, white_s)
            .iter()
            .map(|p| p.size.as_str())
            .collect();
        assert_eq!(sizes, vec!["S", "M"]);
    }

    #[test]
    fn test_stats() {
        assert_eq!(
            stats(&seed_snapshot()),
            InventoryStats {
                total_units: 8,
                unique_items: 3
            }
        );
        assert_eq!(stats(&Snapshot::empty()), InventoryStats::default());
    }
}
