//! Cart facade - the surface the storefront UI actually calls.
//!
//! Product pages add items, the navbar badge polls the total, checkout
//! gating asks whether login is required. Every mutation succeeds locally
//! regardless of authentication (guest checkout is allowed up to but not
//! including purchase); synchronization failures never surface here -
//! the UI reads [`SyncState`] only for an optional "not fully saved"
//! indicator.

use std::sync::Arc;

use copperleaf_core::{ProductId, QuantityLedger, SessionToken};

use crate::config::CartConfig;
use crate::gateway::{CartGateway, HttpCartGateway};
use crate::session::SessionMonitor;
use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage};
use crate::store::LocalCartStore;
use crate::sync::{CartOwnership, CartSynchronizer, SyncState};

/// The public cart surface.
///
/// Cheaply cloneable; clones share the same underlying engine. Construct
/// one per tab/process over the profile's storage.
#[derive(Clone)]
pub struct CartFacade {
    inner: Arc<FacadeInner>,
}

struct FacadeInner {
    config: CartConfig,
    store: LocalCartStore,
    monitor: SessionMonitor,
    sync: CartSynchronizer,
}

impl CartFacade {
    /// Create a facade over explicit storage and gateway implementations.
    ///
    /// Must be called from within a tokio runtime (the session monitor
    /// arms its expiry timer on construction).
    #[must_use]
    pub fn new(
        config: CartConfig,
        storage: Arc<dyn KeyValueStorage>,
        gateway: Arc<dyn CartGateway>,
    ) -> Self {
        let store = LocalCartStore::new(storage.clone());
        let monitor = SessionMonitor::new(storage);
        let sync = CartSynchronizer::new(store.clone(), monitor.clone(), gateway, &config);

        // Expiry rides the same demotion path as an explicit logout
        let expiry_sync = sync.clone();
        monitor.on_expiry_or_logout(Arc::new(move |token| {
            expiry_sync.handle_expiry(token);
        }));

        // A still-valid stored token resumes an identified session; the
        // stored ledger is already the mirror, so no merge is owed
        if let Some(token) = monitor.current_token() {
            sync.resume(&token);
        }

        Self {
            inner: Arc::new(FacadeInner {
                config,
                store,
                monitor,
                sync,
            }),
        }
    }

    /// Create a facade from configuration alone: file-backed storage when
    /// `CART_STORAGE_PATH` is set (in-memory otherwise) and the HTTP
    /// gateway against the configured cart resource.
    #[must_use]
    pub fn from_config(config: CartConfig) -> Self {
        let storage: Arc<dyn KeyValueStorage> = match &config.storage_path {
            Some(path) => Arc::new(FileStorage::new(path.clone())),
            None => Arc::new(MemoryStorage::new()),
        };
        let gateway = Arc::new(HttpCartGateway::new(&config));
        Self::new(config, storage, gateway)
    }

    // =========================================================================
    // Mutations (always succeed locally)
    // =========================================================================

    /// Add one unit of a product to the cart.
    pub fn add_to_cart(&self, product: &ProductId) {
        self.inner.store.increment(product, 1);
        self.inner.sync.schedule_debounced_push();
    }

    /// Remove one unit of a product from the cart (clamping at zero).
    pub fn remove_from_cart(&self, product: &ProductId) {
        self.inner.store.decrement(product, 1);
        self.inner.sync.schedule_debounced_push();
    }

    /// Set a product's quantity outright; zero removes the entry.
    pub fn update_quantity(&self, product: &ProductId, quantity: u32) {
        let mut ledger = self.inner.store.get();
        ledger.set_quantity(product.clone(), quantity);
        self.inner.store.set(&ledger);
        self.inner.sync.schedule_debounced_push();
    }

    // =========================================================================
    // Reads (pure, render-path cheap)
    // =========================================================================

    /// Sum of all quantities in the cart. Never touches the network.
    #[must_use]
    pub fn total_cart_items(&self) -> u64 {
        self.inner.store.get().total_items()
    }

    /// The current ledger (for cart-page rendering).
    #[must_use]
    pub fn ledger(&self) -> QuantityLedger {
        self.inner.store.get()
    }

    /// True while the cart has no authenticated owner; checkout-initiating
    /// UI must redirect to authentication first.
    #[must_use]
    pub fn requires_login_for_checkout(&self) -> bool {
        matches!(self.inner.sync.ownership(), CartOwnership::Guest)
    }

    /// Authentication URL carrying the originating location, so
    /// navigation resumes where checkout was attempted.
    #[must_use]
    pub fn login_redirect(&self, origin: &str) -> String {
        format!(
            "{}?redirect={}",
            self.inner.config.login_path,
            urlencoding::encode(origin)
        )
    }

    /// Current synchronization status (optional UI indicator only).
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.inner.sync.sync_state()
    }

    /// Current cart ownership.
    #[must_use]
    pub fn ownership(&self) -> CartOwnership {
        self.inner.sync.ownership()
    }

    // =========================================================================
    // Session boundaries
    // =========================================================================

    /// Adopt a token freshly issued by the authentication service and
    /// merge the guest cart into the account's server cart.
    ///
    /// A malformed token is logged and dropped - the caller stays a
    /// guest, per the engine's silent-discard policy.
    pub async fn login(&self, raw_token: &str) {
        match SessionToken::parse(raw_token) {
            Ok(token) => self.inner.sync.login(token).await,
            Err(e) => {
                tracing::warn!(error = %e, "login token malformed, staying guest");
            }
        }
    }

    /// Explicit logout: one best-effort push of the current ledger, then
    /// demotion to guest. The visible cart contents are retained.
    pub async fn logout(&self) {
        let token = self.inner.monitor.current_token();
        self.inner.monitor.discard();
        self.inner.sync.save_before_logout(token).await;
    }

    /// Tab-visibility hook: reconcile with the shared storage profile.
    ///
    /// If a sibling tab logged in, adopt the session; if it logged out (or
    /// the token lapsed while this tab was hidden), demote to guest. The
    /// ledger itself is read through storage on every access, so foreign
    /// cart writes need no extra work.
    pub fn refresh(&self) {
        let is_guest = matches!(self.inner.sync.ownership(), CartOwnership::Guest);
        if self.inner.monitor.revalidate() {
            if is_guest && let Some(token) = self.inner.monitor.current_token() {
                tracing::debug!("sibling tab logged in, adopting session");
                self.inner.sync.resume(&token);
            }
        } else if !is_guest {
            tracing::debug!("session gone on refresh, demoting to guest");
            let sync = self.inner.sync.clone();
            tokio::spawn(async move {
                sync.save_before_logout(None).await;
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn facade() -> CartFacade {
        let config = CartConfig::with_base_url("https://api.example.test").unwrap();
        // HTTP gateway is constructed but nothing pushes while guest
        let gateway = Arc::new(HttpCartGateway::new(&config));
        CartFacade::new(config, Arc::new(MemoryStorage::new()), gateway)
    }

    fn pid(s: &str) -> ProductId {
        ProductId::new(s)
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_mutations_track_reference_ledger() {
        let facade = facade();
        let mut reference = 0_u64;

        for _ in 0..4 {
            facade.add_to_cart(&pid("p1"));
            reference += 1;
        }
        facade.add_to_cart(&pid("p2"));
        reference += 1;
        facade.remove_from_cart(&pid("p1"));
        reference -= 1;

        assert_eq!(facade.total_cart_items(), reference);
        assert!(facade.requires_login_for_checkout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_quantity_zero_removes() {
        let facade = facade();
        facade.update_quantity(&pid("p1"), 3);
        assert_eq!(facade.total_cart_items(), 3);

        facade.update_quantity(&pid("p1"), 0);
        assert_eq!(facade.total_cart_items(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_redirect_preserves_origin() {
        let facade = facade();
        assert_eq!(
            facade.login_redirect("/checkout?step=2"),
            "/login?redirect=%2Fcheckout%3Fstep%3D2"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_login_token_stays_guest() {
        let facade = facade();
        facade.login("definitely-not-a-jwt").await;
        assert!(facade.requires_login_for_checkout());
        assert_eq!(facade.sync_state(), SyncState::Idle);
    }
}
