//! # Snapshot File
//!
//! The single persisted copy of the local inventory: one JSON array of
//! products, rewritten after every change.
//!
//! ## Load Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  file absent ──────────────► fallback (seed inventory)                  │
//! │  file unreadable / corrupt ► fallback, warning logged                   │
//! │  file holds `[]` ──────────► empty inventory (a valid state)            │
//! │  file holds products ──────► that snapshot                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use discreet_core::Snapshot;

use crate::error::{DbError, DbResult};

/// File name inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "discreet_inventory_v8.json";

/// Location of the persisted snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotFile { path: path.into() }
    }

    /// Platform data directory location, e.g.
    /// `~/.local/share/discreet-terminal/discreet_inventory_v8.json`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "discreet", "terminal")
            .map(|dirs| dirs.data_dir().join(SNAPSHOT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot. `Ok(None)` when the file does not exist.
    pub async fn load(&self) -> DbResult<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), products = snapshot.len(), "Loaded snapshot file");
        Ok(Some(snapshot))
    }

    /// Reads the snapshot, or builds one with `fallback` when the file is
    /// absent or unusable.
    pub async fn load_or_else<F>(&self, fallback: F) -> Snapshot
    where
        F: FnOnce() -> Snapshot,
    {
        match self.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(path = %self.path.display(), "No snapshot file, starting from seed");
                fallback()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot file unusable, starting from seed");
                fallback()
            }
        }
    }

    /// Writes the snapshot atomically.
    pub async fn save(&self, snapshot: &Snapshot) -> DbResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec(snapshot)
            .map_err(|e| DbError::Internal(format!("serialize snapshot: {e}")))?;

        let tmp = self.path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), products = snapshot.len(), "Saved snapshot file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discreet_core::seed_snapshot;

    #[tokio::test]
    async fn test_absent_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));

        assert!(file.load().await.unwrap().is_none());
        assert_eq!(file.load_or_else(seed_snapshot).await, seed_snapshot());
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, b"{not json").unwrap();

        let file = SnapshotFile::new(&path);
        assert!(matches!(file.load().await, Err(DbError::Corrupt(_))));
        assert_eq!(file.load_or_else(seed_snapshot).await, seed_snapshot());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested/dir/inventory.json"));

        let mut products = seed_snapshot().to_vec();
        products.reverse();
        let snapshot = Snapshot::new(products);

        file.save(&snapshot).await.unwrap();
        assert_eq!(file.load().await.unwrap(), Some(snapshot));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("nested/dir"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1, "temp file renamed away");
    }

    #[tokio::test]
    async fn test_empty_array_is_a_valid_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("inventory.json"));

        file.save(&Snapshot::empty()).await.unwrap();
        assert!(file.load_or_else(seed_snapshot).await.is_empty());
    }
}
