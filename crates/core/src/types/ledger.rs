//! The quantity ledger - a cart's contents as a product → quantity map.
//!
//! The ledger is the shared data structure both the guest cart and the
//! server-mirrored cart operate on. Invariant: no entry ever holds a
//! quantity of zero - absence of a key means zero, and any operation that
//! would drive a quantity to zero removes the entry instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// A cart's contents: product identifier → positive quantity.
///
/// Serializes as a flat JSON object (`{"<product-id>": <qty>, ...}`), the
/// same shape used on the wire and in durable storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QuantityLedger(HashMap<ProductId, u32>);

impl<'de> Deserialize<'de> for QuantityLedger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Zero-quantity entries in a stored or wire payload are dropped on
        // read so the no-zero-entry invariant holds everywhere.
        let raw = HashMap::<ProductId, u32>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}

impl QuantityLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the ledger holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct products in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Quantity for a product; zero if absent.
    #[must_use]
    pub fn quantity(&self, product: &ProductId) -> u32 {
        self.0.get(product).copied().unwrap_or(0)
    }

    /// Set a product's quantity. A quantity of zero removes the entry.
    pub fn set_quantity(&mut self, product: ProductId, quantity: u32) {
        if quantity == 0 {
            self.0.remove(&product);
        } else {
            self.0.insert(product, quantity);
        }
    }

    /// Increase a product's quantity by `by`, saturating at `u32::MAX`.
    pub fn increment(&mut self, product: ProductId, by: u32) {
        if by == 0 {
            return;
        }
        let current = self.quantity(&product);
        self.0.insert(product, current.saturating_add(by));
    }

    /// Decrease a product's quantity by `by`.
    ///
    /// Decrementing at or below zero clamps to removal - a negative
    /// quantity is never stored.
    pub fn decrement(&mut self, product: &ProductId, by: u32) {
        let current = self.quantity(product);
        if current > by {
            self.0.insert(product.clone(), current - by);
        } else {
            self.0.remove(product);
        }
    }

    /// Remove a product entirely.
    pub fn remove(&mut self, product: &ProductId) {
        self.0.remove(product);
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Sum of all quantities across the ledger.
    ///
    /// Cheap enough to call on every render (no allocation, single pass).
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.0.values().map(|&q| u64::from(q)).sum()
    }

    /// Additive merge: key-wise union of `self` and `other`, summing
    /// quantities for keys present in both.
    ///
    /// This is the login reconciliation rule - a guest who added 2 units
    /// of a product into an account that already held 1 unit server-side
    /// ends up with 3.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (product, &quantity) in &other.0 {
            merged.increment(product.clone(), quantity);
        }
        merged
    }

    /// Iterate over entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProductId, u32)> {
        self.0.iter().map(|(p, &q)| (p, q))
    }
}

impl FromIterator<(ProductId, u32)> for QuantityLedger {
    fn from_iter<T: IntoIterator<Item = (ProductId, u32)>>(iter: T) -> Self {
        let mut ledger = Self::new();
        for (product, quantity) in iter {
            ledger.set_quantity(product, quantity);
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s)
    }

    #[test]
    fn test_absent_key_means_zero() {
        let ledger = QuantityLedger::new();
        assert_eq!(ledger.quantity(&pid("p1")), 0);
        assert_eq!(ledger.total_items(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_zero_quantity_is_never_stored() {
        let mut ledger = QuantityLedger::new();
        ledger.set_quantity(pid("p1"), 0);
        assert!(ledger.is_empty());

        ledger.increment(pid("p1"), 2);
        ledger.decrement(&pid("p1"), 2);
        assert!(ledger.is_empty());

        // From-iterator path enforces the same invariant
        let ledger: QuantityLedger = [(pid("a"), 3), (pid("b"), 0)].into_iter().collect();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.quantity(&pid("a")), 3);

        // And so does deserialization of a stale payload
        let ledger: QuantityLedger =
            serde_json::from_value(serde_json::json!({"a": 3, "b": 0})).expect("deserialize");
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_decrement_clamps_to_removal() {
        let mut ledger = QuantityLedger::new();
        ledger.increment(pid("p1"), 1);
        ledger.decrement(&pid("p1"), 5);
        assert_eq!(ledger.quantity(&pid("p1")), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_total_items_sums_all_quantities() {
        let mut ledger = QuantityLedger::new();
        ledger.increment(pid("p1"), 2);
        ledger.increment(pid("p2"), 1);
        ledger.increment(pid("p1"), 1);
        assert_eq!(ledger.total_items(), 4);
    }

    #[test]
    fn test_merge_is_additive() {
        let server: QuantityLedger = [(pid("A"), 1), (pid("B"), 2)].into_iter().collect();
        let guest: QuantityLedger = [(pid("A"), 2)].into_iter().collect();

        let merged = server.merge(&guest);
        assert_eq!(merged.quantity(&pid("A")), 3);
        assert_eq!(merged.quantity(&pid("B")), 2);
        assert_eq!(merged.total_items(), 5);
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        let server: QuantityLedger = [(pid("A"), 3), (pid("B"), 2)].into_iter().collect();
        let merged = server.merge(&QuantityLedger::new());
        assert_eq!(merged, server);
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let ledger: QuantityLedger = [(pid("sku-1"), 2)].into_iter().collect();
        let json = serde_json::to_value(&ledger).expect("serialize");
        assert_eq!(json, serde_json::json!({"sku-1": 2}));

        let back: QuantityLedger =
            serde_json::from_value(serde_json::json!({"sku-1": 2})).expect("deserialize");
        assert_eq!(back, ledger);
    }
}
