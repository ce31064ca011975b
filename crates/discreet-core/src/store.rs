//! # Inventory Store
//!
//! The single funnel for every inventory mutation.
//!
//! ## Mutation Funnel
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  scan / CSV import                       inbound sync message           │
//! │        │                                          │                     │
//! │        ▼                                          ▼                     │
//! │  apply(mutator) ─┐                      replace(snapshot)               │
//! │                  │   write lock held            │                       │
//! │                  ▼   for the whole step         ▼                       │
//! │        next = mutator(current)          current = snapshot              │
//! │        current = next                                                   │
//! │                  │                                                      │
//! │                  ▼                                                      │
//! │        caller forwards `next` to every active sync channel              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A mutator always runs against the latest snapshot: the write lock is held
//! from read to publish, so two mutations can never interleave.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::product::Snapshot;

#[derive(Debug, Default)]
struct StoreState {
    current: Snapshot,
    revision: u64,
}

/// Owner of the current snapshot.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug, Default)]
pub struct InventoryStore {
    state: RwLock<StoreState>,
}

impl InventoryStore {
    /// Creates a store holding `initial`.
    pub fn new(initial: Snapshot) -> Self {
        InventoryStore {
            state: RwLock::new(StoreState {
                current: initial,
                revision: 0,
            }),
        }
    }

    /// Returns the current snapshot.
    pub fn current(&self) -> Snapshot {
        self.read().current.clone()
    }

    /// Number of changes applied since construction.
    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    /// Computes `next = mutator(current)`, installs it and returns it.
    pub fn apply<F>(&self, mutator: F) -> Snapshot
    where
        F: FnOnce(&Snapshot) -> Snapshot,
    {
        let mut state = self.write();
        let next = mutator(&state.current);
        state.current = next.clone();
        state.revision += 1;
        next
    }

    /// Like [`apply`](Self::apply) for mutators that can refuse.
    ///
    /// On `Err` the current snapshot is left exactly as it was.
    pub fn try_apply<F, E>(&self, mutator: F) -> Result<Snapshot, E>
    where
        F: FnOnce(&Snapshot) -> Result<Snapshot, E>,
    {
        let mut state = self.write();
        let next = mutator(&state.current)?;
        state.current = next.clone();
        state.revision += 1;
        Ok(next)
    }

    /// Replaces the current snapshot wholesale. No merge.
    ///
    /// Returns `true` when the new snapshot differs from the old one.
    pub fn replace(&self, next: Snapshot) -> bool {
        let mut state = self.write();
        let changed = state.current != next;
        state.current = next;
        state.revision += 1;
        changed
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::product::seed_snapshot;
    use std::sync::Arc;

    #[test]
    fn test_apply_returns_and_installs_mutator_output() {
        let store = InventoryStore::new(seed_snapshot());
        let before = store.current();

        let next = store.apply(|s| s.iter().filter(|p| p.stock > 1).cloned().collect());

        assert_eq!(next.len(), 2);
        assert_eq!(store.current(), next);
        assert_eq!(before.len(), 3, "old snapshot is never edited");
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_failed_mutator_leaves_snapshot_untouched() {
        let store = InventoryStore::new(seed_snapshot());
        let before = store.current();

        let result: Result<Snapshot, CoreError> =
            store.try_apply(|_| Err(CoreError::ProductNotFound("x".into())));

        assert!(result.is_err());
        assert!(store.current().ptr_eq(&before));
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_replace_preserves_order() {
        let store = InventoryStore::default();
        let mut reversed = seed_snapshot().to_vec();
        reversed.reverse();
        let reversed = Snapshot::new(reversed);

        assert!(store.replace(reversed.clone()));
        assert_eq!(store.current(), reversed);
        assert_eq!(store.current()[0].barcode, "100103");
        assert!(!store.replace(reversed), "same content is not a change");
    }

    #[test]
    fn test_concurrent_mutators_never_lose_updates() {
        let store = Arc::new(InventoryStore::new(seed_snapshot()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        store.apply(|s| {
                            s.iter()
                                .map(|p| p.with_stock(p.stock + 1))
                                .collect()
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.current().find("100101").unwrap().stock, 5 + 200);
        assert_eq!(store.revision(), 200);
    }
}
