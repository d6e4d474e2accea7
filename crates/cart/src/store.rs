//! The local cart store - the write-through ledger every tab mutates.
//!
//! Owns the `cart.items` storage record. All operations are synchronous
//! and side-effect durable storage immediately, so a page reload never
//! loses state. Each mutation re-reads storage first (read-modify-write):
//! concurrent tabs reconcile through the storage itself with
//! last-writer-wins semantics, an accepted race.

use std::sync::Arc;

use copperleaf_core::{ProductId, QuantityLedger};

use crate::storage::{KeyValueStorage, storage_keys};

/// Write-through store for the locally-held quantity ledger.
///
/// Usable with or without authentication - this is the guest cart while
/// ownership is `Guest` and the local mirror while `Identified`.
#[derive(Clone)]
pub struct LocalCartStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl LocalCartStore {
    /// Create a store over a storage profile.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Read the current ledger. Absent or corrupt records read as empty
    /// (the guest ledger is "created empty on first load").
    #[must_use]
    pub fn get(&self) -> QuantityLedger {
        let Some(raw) = self.storage.get(storage_keys::CART_ITEMS) else {
            return QuantityLedger::new();
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "stored cart record corrupt, starting empty");
            QuantityLedger::new()
        })
    }

    /// Replace the stored ledger wholesale.
    pub fn set(&self, ledger: &QuantityLedger) {
        match serde_json::to_string(ledger) {
            Ok(json) => self.storage.set(storage_keys::CART_ITEMS, &json),
            Err(e) => tracing::warn!(error = %e, "cart record encode failed"),
        }
    }

    /// Increase a product's quantity by `by`.
    pub fn increment(&self, product: &ProductId, by: u32) {
        let mut ledger = self.get();
        ledger.increment(product.clone(), by);
        self.set(&ledger);
    }

    /// Decrease a product's quantity by `by`, clamping to removal at zero.
    pub fn decrement(&self, product: &ProductId, by: u32) {
        let mut ledger = self.get();
        ledger.decrement(product, by);
        self.set(&ledger);
    }

    /// Remove a product entirely.
    pub fn remove(&self, product: &ProductId) {
        let mut ledger = self.get();
        ledger.remove(product);
        self.set(&ledger);
    }

    /// Clear the stored ledger.
    pub fn clear(&self) {
        self.set(&QuantityLedger::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store() -> LocalCartStore {
        LocalCartStore::new(Arc::new(MemoryStorage::new()))
    }

    fn pid(s: &str) -> ProductId {
        ProductId::new(s)
    }

    #[test]
    fn test_first_read_is_empty() {
        assert!(store().get().is_empty());
    }

    #[test]
    fn test_mutations_write_through() {
        let storage = Arc::new(MemoryStorage::new());
        let store = LocalCartStore::new(storage.clone());

        store.increment(&pid("p1"), 2);
        store.increment(&pid("p2"), 1);
        store.decrement(&pid("p1"), 1);

        // A second store over the same profile (a "reload") sees the state
        let reloaded = LocalCartStore::new(storage);
        let ledger = reloaded.get();
        assert_eq!(ledger.quantity(&pid("p1")), 1);
        assert_eq!(ledger.quantity(&pid("p2")), 1);
    }

    #[test]
    fn test_decrement_clamps_to_removal() {
        let store = store();
        store.increment(&pid("p1"), 1);
        store.decrement(&pid("p1"), 3);
        assert!(store.get().is_empty());
    }

    #[test]
    fn test_corrupt_record_reads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(storage_keys::CART_ITEMS, "][ definitely not json");

        let store = LocalCartStore::new(storage);
        assert!(store.get().is_empty());
    }

    #[test]
    fn test_cross_tab_read_modify_write() {
        let storage = Arc::new(MemoryStorage::new());
        let tab_a = LocalCartStore::new(storage.clone());
        let tab_b = LocalCartStore::new(storage);

        tab_a.increment(&pid("p1"), 1);
        // tab_b re-reads before mutating, so it sees tab_a's write
        tab_b.increment(&pid("p1"), 1);

        assert_eq!(tab_a.get().quantity(&pid("p1")), 2);
    }
}
