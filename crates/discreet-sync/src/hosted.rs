//! # Hosted Store Sync
//!
//! Keeps a terminal's inventory in a shared database keyed by store code.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create_store(snapshot) ──► new StoreCode, rows upserted if non-empty   │
//! │  update_store(code, s)  ──► one upsert per product (last writer wins)   │
//! │  fetch_store(code)      ──► Snapshot, or StoreNotFound when no rows     │
//! │  subscribe_to_changes   ──► callback on every change to that store      │
//! │                                                                         │
//! │  Without a configured backend every call fails with                     │
//! │  ConfigurationMissing before touching the network.                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are never deleted: a product removed locally stays in the hosted
//! table.

use std::sync::Arc;
use tracing::{debug, info, warn};

use discreet_core::Snapshot;
use discreet_db::{HostedDatabase, HostedDbConfig, RowStore};

use crate::error::{SyncError, SyncResult};
use crate::identity::StoreCode;
use crate::subscription::{Gate, Subscription};

const BACKEND_NAME: &str = "Hosted store";

/// Client for the hosted inventory.
#[derive(Clone)]
pub struct HostedSync {
    rows: Option<Arc<dyn RowStore>>,
    code_prefix: String,
}

impl std::fmt::Debug for HostedSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedSync")
            .field("configured", &self.is_configured())
            .field("code_prefix", &self.code_prefix)
            .finish()
    }
}

impl HostedSync {
    /// A client with no backend.
    pub fn unconfigured() -> Self {
        HostedSync {
            rows: None,
            code_prefix: "discreet".to_string(),
        }
    }

    pub fn new(rows: Arc<dyn RowStore>, code_prefix: impl Into<String>) -> Self {
        HostedSync {
            rows: Some(rows),
            code_prefix: code_prefix.into(),
        }
    }

    /// Connects to Postgres when a URL is given, otherwise stays
    /// unconfigured.
    pub async fn connect(database_url: Option<&str>, code_prefix: &str) -> SyncResult<Self> {
        let Some(url) = database_url.filter(|u| !u.trim().is_empty()) else {
            info!("No hosted database configured");
            return Ok(HostedSync {
                rows: None,
                code_prefix: code_prefix.to_string(),
            });
        };

        let db = HostedDatabase::connect(HostedDbConfig::new(url)).await?;
        Ok(HostedSync::new(Arc::new(db.inventory()), code_prefix))
    }

    pub fn is_configured(&self) -> bool {
        self.rows.is_some()
    }

    fn rows(&self) -> SyncResult<&Arc<dyn RowStore>> {
        self.rows
            .as_ref()
            .ok_or_else(|| SyncError::ConfigurationMissing(BACKEND_NAME.into()))
    }

    /// Creates a store holding `snapshot` and returns its code.
    pub async fn create_store(&self, snapshot: &Snapshot) -> SyncResult<StoreCode> {
        let rows = self.rows()?;
        let code = StoreCode::generate(&self.code_prefix);

        if !snapshot.is_empty() {
            rows.upsert_rows(code.as_str(), snapshot).await?;
        }

        info!(store_code = %code, products = snapshot.len(), "Created hosted store");
        Ok(code)
    }

    /// Writes every product of `snapshot` to the store.
    pub async fn update_store(&self, code: &str, snapshot: &Snapshot) -> SyncResult<()> {
        let rows = self.rows()?;
        let code = StoreCode::parse(code)?;

        let written = rows.upsert_rows(code.as_str(), snapshot).await?;
        debug!(store_code = %code, rows = written, "Updated hosted store");
        Ok(())
    }

    /// Reads the full inventory of a store.
    pub async fn fetch_store(&self, code: &str) -> SyncResult<Snapshot> {
        let rows = self.rows()?;
        let code = StoreCode::parse(code)?;

        let fetched = rows.fetch_rows(code.as_str()).await?;
        if fetched.is_empty() {
            return Err(SyncError::StoreNotFound(code.to_string()));
        }

        Ok(fetched.into_iter().map(|row| row.into_product()).collect())
    }

    /// Calls `on_change` whenever rows of the store change, including
    /// changes written by this terminal.
    pub async fn subscribe_to_changes<F>(&self, code: &str, on_change: F) -> SyncResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let rows = self.rows()?;
        let code = StoreCode::parse(code)?;

        let mut feed = rows.watch(code.as_str()).await?;
        let gate = Gate::new();
        let task_gate = gate.clone();

        let task = tokio::spawn(async move {
            while feed.changed().await.is_some() {
                if task_gate.run(&on_change).is_none() {
                    break;
                }
            }
            if task_gate.is_open() {
                warn!(store_code = %code, "Hosted change feed ended");
            }
        });

        Ok(Subscription::new(gate, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discreet_core::seed_snapshot;
    use discreet_db::MemoryRowStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn hosted() -> HostedSync {
        HostedSync::new(Arc::new(MemoryRowStore::new()), "dsc")
    }

    #[tokio::test]
    async fn test_unconfigured_fails_before_any_io() {
        let hosted = HostedSync::unconfigured();

        let err = hosted.fetch_store("any").await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigurationMissing(_)));

        assert!(matches!(
            hosted.create_store(&seed_snapshot()).await,
            Err(SyncError::ConfigurationMissing(_))
        ));
        assert!(matches!(
            hosted.update_store("any", &seed_snapshot()).await,
            Err(SyncError::ConfigurationMissing(_))
        ));
        assert!(matches!(
            hosted.subscribe_to_changes("any", || {}).await,
            Err(SyncError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_without_url_is_unconfigured() {
        let hosted = HostedSync::connect(None, "dsc").await.unwrap();
        assert!(!hosted.is_configured());
        let blank = HostedSync::connect(Some("  "), "dsc").await.unwrap();
        assert!(!blank.is_configured());
    }

    #[tokio::test]
    async fn test_create_then_fetch() {
        let hosted = hosted();
        let code = hosted.create_store(&seed_snapshot()).await.unwrap();

        assert!(code.as_str().starts_with("dsc-"));
        assert_eq!(hosted.fetch_store(code.as_str()).await.unwrap(), seed_snapshot());
    }

    #[tokio::test]
    async fn test_empty_store_is_not_found() {
        let hosted = hosted();
        let code = hosted.create_store(&Snapshot::empty()).await.unwrap();

        let err = hosted.fetch_store(code.as_str()).await.unwrap_err();
        assert!(matches!(err, SyncError::StoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_upserts_without_deleting() {
        let hosted = hosted();
        let code = hosted.create_store(&seed_snapshot()).await.unwrap();

        let shrunk = Snapshot::new(vec![seed_snapshot()[0].with_stock(9)]);
        hosted.update_store(code.as_str(), &shrunk).await.unwrap();

        let fetched = hosted.fetch_store(code.as_str()).await.unwrap();
        assert_eq!(fetched.len(), 3);
        assert_eq!(fetched.find("100101").unwrap().stock, 9);
    }

    #[tokio::test]
    async fn test_subscriber_hears_writes_until_unsubscribed() {
        let hosted = hosted();
        let code = hosted.create_store(&seed_snapshot()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = hosted
            .subscribe_to_changes(code.as_str(), move || drop(tx.send(())))
            .await
            .unwrap();

        hosted.update_store(code.as_str(), &seed_snapshot()).await.unwrap();
        let heard = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(heard, Some(()));

        sub.unsubscribe();
        hosted.update_store(code.as_str(), &seed_snapshot()).await.unwrap();
        let after = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(after, Ok(None) | Err(_)));
    }
}
