//! # Hosted Rows
//!
//! Row shape of the hosted inventory table and the [`RowStore`] seam that
//! hosted sync talks to.
//!
//! ## Table Layout
//! ```text
//! inventory
//! ┌──────────┬─────────┬───────────┬─────────────┬─────────────┬─────┬──────────┐
//! │ store_id │ barcode │ item_code │ description │ price_cents │ ... │updated_at│
//! ├──────────┴─────────┼───────────┴─────────────┴─────────────┴─────┴──────────┤
//! │  PRIMARY KEY       │  every write is an upsert on (store_id, barcode)       │
//! └────────────────────┴────────────────────────────────────────────────────────┘
//! ```
//!
//! Last writer for a given barcode wins. Rows are never deleted by sync.
//! Rows come back in the order their barcodes were first written, so a
//! snapshot survives a push and pull with its product order intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use discreet_core::{Money, Product};

use crate::error::DbResult;

// =============================================================================
// Inventory Row
// =============================================================================

/// One product of one hosted store.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InventoryRow {
    pub store_id: String,
    pub barcode: String,
    pub item_code: String,
    pub description: String,
    pub price_cents: i64,
    pub color_code: String,
    pub color_name: String,
    pub size: String,
    pub stock: i32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRow {
    /// Builds the row for `product` in store `store_id`.
    pub fn from_product(store_id: &str, product: &Product, updated_at: DateTime<Utc>) -> Self {
        InventoryRow {
            store_id: store_id.to_string(),
            barcode: product.barcode.clone(),
            item_code: product.item_code.clone(),
            description: product.description.clone(),
            price_cents: product.price.cents(),
            color_code: product.color_code.clone(),
            color_name: product.color_name.clone(),
            size: product.size.clone(),
            stock: i32::try_from(product.stock).unwrap_or(i32::MAX),
            updated_at,
        }
    }

    /// Converts back to a product. Negative stock written by other clients
    /// reads as zero.
    pub fn into_product(self) -> Product {
        Product {
            barcode: self.barcode,
            item_code: self.item_code,
            description: self.description,
            price: Money::from_cents(self.price_cents),
            color_code: self.color_code,
            color_name: self.color_name,
            size: self.size,
            stock: u32::try_from(self.stock).unwrap_or(0),
        }
    }
}

// =============================================================================
// Change Feed
// =============================================================================

/// Stream of "rows of this store changed" pings.
///
/// Pings carry no data; the subscriber re-fetches. Bursts collapse into a
/// single pending ping. Dropping the feed stops the listener task behind it.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::Receiver<()>,
    task: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    /// Capacity of one: a pending ping already means "re-fetch".
    pub fn channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
        mpsc::channel(1)
    }

    /// Wraps a receiver and the task that feeds it.
    pub fn new(rx: mpsc::Receiver<()>, task: JoinHandle<()>) -> Self {
        ChangeFeed {
            rx,
            task: Some(task),
        }
    }

    /// Waits for the next change. `None` once the listener has stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Records a change on a feed sender without ever blocking.
///
/// Returns `false` once the feed has been dropped.
pub(crate) fn ping(tx: &mpsc::Sender<()>) -> bool {
    match tx.try_send(()) {
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
        Err(mpsc::error::TrySendError::Closed(())) => false,
    }
}

// =============================================================================
// Row Store
// =============================================================================

/// A remote table of inventory rows keyed by (store code, barcode).
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    /// Upserts one row per product. Returns the number of rows written.
    async fn upsert_rows(&self, store_code: &str, products: &[Product]) -> DbResult<usize>;

    /// All rows of one store, in first-insertion order. Updating a row
    /// keeps its position.
    async fn fetch_rows(&self, store_code: &str) -> DbResult<Vec<InventoryRow>>;

    /// Subscribes to row changes of one store.
    async fn watch(&self, store_code: &str) -> DbResult<ChangeFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use discreet_core::seed_snapshot;

    #[test]
    fn test_row_conversion_keeps_product() {
        let product = seed_snapshot()[0].clone();
        let row = InventoryRow::from_product("discreet-ab12c", &product, Utc::now());

        assert_eq!(row.store_id, "discreet-ab12c");
        assert_eq!(row.price_cents, 12000);
        assert_eq!(row.into_product(), product);
    }

    #[test]
    fn test_negative_remote_stock_reads_as_zero() {
        let mut row = InventoryRow::from_product("s", &seed_snapshot()[0], Utc::now());
        row.stock = -4;
        assert_eq!(row.into_product().stock, 0);
    }

    #[tokio::test]
    async fn test_ping_coalesces_and_detects_drop() {
        let (tx, mut rx) = ChangeFeed::channel();
        assert!(ping(&tx));
        assert!(ping(&tx), "full channel still counts as delivered");
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!ping(&tx));
    }
}
