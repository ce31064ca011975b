//! # In-Memory Row Store
//!
//! Process-local [`RowStore`]. Clones share the same table, so several
//! terminals in one process (tests, demos) see each other's writes and get
//! change pings exactly like they would from Postgres.
//!
//! Each store keeps its rows in insertion order, matching the hosted table's
//! sequence column.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use discreet_core::Product;

use crate::error::DbResult;
use crate::rows::{ping, ChangeFeed, InventoryRow, RowStore};

/// Shared in-memory inventory table.
#[derive(Debug, Clone)]
pub struct MemoryRowStore {
    rows: Arc<RwLock<HashMap<String, Vec<InventoryRow>>>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRowStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        MemoryRowStore {
            rows: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Number of rows across all stores.
    pub async fn len(&self) -> usize {
        self.rows.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn upsert_rows(&self, store_code: &str, products: &[Product]) -> DbResult<usize> {
        if products.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        {
            let mut rows = self.rows.write().await;
            let table = rows.entry(store_code.to_string()).or_default();
            for product in products {
                let row = InventoryRow::from_product(store_code, product, now);
                match table.iter_mut().find(|r| r.barcode == row.barcode) {
                    Some(existing) => *existing = row,
                    None => table.push(row),
                }
            }
        }

        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(store_code.to_string());

        debug!(store_code = %store_code, rows = products.len(), "Upserted in-memory rows");
        Ok(products.len())
    }

    async fn fetch_rows(&self, store_code: &str) -> DbResult<Vec<InventoryRow>> {
        let rows = self.rows.read().await;
        Ok(rows.get(store_code).cloned().unwrap_or_default())
    }

    async fn watch(&self, store_code: &str) -> DbResult<ChangeFeed> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = ChangeFeed::channel();
        let code = store_code.to_string();

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(changed) if changed == code => {
                        if !ping(&tx) {
                            break;
                        }
                    }
                    Ok(_) => {}
                    // Missed some pings: one re-fetch covers all of them.
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if !ping(&tx) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ChangeFeed::new(rx, task))
    }
}
