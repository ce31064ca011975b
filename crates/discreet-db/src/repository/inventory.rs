//! # Inventory Repository
//!
//! Postgres implementation of [`RowStore`].
//!
//! ## Change Notifications
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Terminal A                     Postgres                   Terminal B   │
//! │     │                              │                           │        │
//! │     │ upsert_rows (1 transaction)  │                           │        │
//! │     │─────────────────────────────►│                           │        │
//! │     │                              │ trigger:                  │        │
//! │     │                              │ pg_notify(                │        │
//! │     │                              │  'inventory_changes',     │        │
//! │     │                              │  store_id)                │        │
//! │     │                              │──────────────────────────►│        │
//! │     │                              │          PgListener       │        │
//! │     │                              │          payload == code? │        │
//! │     │                              │          → ping feed      │        │
//! │     │                              │◄──────────────────────────│        │
//! │     │                              │   fetch_rows (re-pull)    │        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use discreet_core::Product;

use crate::error::DbResult;
use crate::migrations::CHANGE_CHANNEL;
use crate::rows::{ping, ChangeFeed, InventoryRow, RowStore};

/// Rows per INSERT statement. Ten binds per row keeps this well under the
/// Postgres bind-parameter limit.
const UPSERT_CHUNK: usize = 1000;

/// Repository for hosted inventory rows.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: PgPool,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        InventoryRepository { pool }
    }

    /// Number of rows stored for one store.
    pub async fn count(&self, store_code: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM inventory WHERE store_id = $1")
            .bind(store_code)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RowStore for InventoryRepository {
    async fn upsert_rows(&self, store_code: &str, products: &[Product]) -> DbResult<usize> {
        if products.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for chunk in products.chunks(UPSERT_CHUNK) {
            let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO inventory (store_id, barcode, item_code, description, price_cents, \
                 color_code, color_name, size, stock, updated_at) ",
            );

            query.push_values(chunk, |mut row, product| {
                let r = InventoryRow::from_product(store_code, product, now);
                row.push_bind(r.store_id)
                    .push_bind(r.barcode)
                    .push_bind(r.item_code)
                    .push_bind(r.description)
                    .push_bind(r.price_cents)
                    .push_bind(r.color_code)
                    .push_bind(r.color_name)
                    .push_bind(r.size)
                    .push_bind(r.stock)
                    .push_bind(r.updated_at);
            });

            query.push(
                " ON CONFLICT (store_id, barcode) DO UPDATE SET \
                 item_code = EXCLUDED.item_code, \
                 description = EXCLUDED.description, \
                 price_cents = EXCLUDED.price_cents, \
                 color_code = EXCLUDED.color_code, \
                 color_name = EXCLUDED.color_name, \
                 size = EXCLUDED.size, \
                 stock = EXCLUDED.stock, \
                 updated_at = EXCLUDED.updated_at",
            );

            query.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        debug!(store_code = %store_code, rows = products.len(), "Upserted inventory rows");
        Ok(products.len())
    }

    async fn fetch_rows(&self, store_code: &str) -> DbResult<Vec<InventoryRow>> {
        let rows = sqlx::query_as::<_, InventoryRow>(
            r#"
            SELECT store_id, barcode, item_code, description, price_cents,
                   color_code, color_name, size, stock, updated_at
            FROM inventory
            WHERE store_id = $1
            ORDER BY seq
            "#,
        )
        .bind(store_code)
        .fetch_all(&self.pool)
        .await?;

        debug!(store_code = %store_code, rows = rows.len(), "Fetched inventory rows");
        Ok(rows)
    }

    async fn watch(&self, store_code: &str) -> DbResult<ChangeFeed> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        info!(store_code = %store_code, "Listening for hosted inventory changes");

        let (tx, rx) = ChangeFeed::channel();
        let code = store_code.to_string();

        let task = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if notification.payload() != code {
                            continue;
                        }
                        if !ping(&tx) {
                            debug!(store_code = %code, "Change feed dropped, stopping listener");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(store_code = %code, error = %e, "Change listener failed");
                        break;
                    }
                }
            }
        });

        Ok(ChangeFeed::new(rx, task))
    }
}
