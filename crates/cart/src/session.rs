//! Session monitor - owns the bearer token and its expiry window.
//!
//! One one-shot timer is armed at exactly the token's expiry instant (the
//! delay is computed up front; the monitor never polls). On fire the
//! stored token is cleared and every registered callback runs exactly
//! once, synchronously, in registration order, receiving the lapsed token
//! so the demotion path can still attempt its best-effort push. A token
//! that fails to decode is discarded immediately and treated identically
//! to an expired one - never retried, never surfaced as an error.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::task::JoinHandle;

use copperleaf_core::SessionToken;

use crate::storage::{KeyValueStorage, storage_keys};

/// Callback invoked when the session lapses. Receives the token that just
/// expired (already removed from storage by the time it runs).
pub type ExpiryCallback = Arc<dyn Fn(SessionToken) + Send + Sync>;

/// Tracks the bearer token's validity window and emits expiry events.
///
/// Cheaply cloneable; clones share the same monitor.
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    storage: Arc<dyn KeyValueStorage>,
    token: Mutex<Option<SessionToken>>,
    callbacks: Mutex<Vec<ExpiryCallback>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionMonitor {
    /// Create a monitor over a storage profile, adopting any stored token.
    ///
    /// A stored token that is malformed or already expired is removed from
    /// storage right away; a valid one arms the expiry timer.
    ///
    /// Must be called from within a tokio runtime (the timer is a spawned
    /// task).
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let monitor = Self {
            inner: Arc::new(MonitorInner {
                storage,
                token: Mutex::new(None),
                callbacks: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
            }),
        };

        monitor.adopt_stored_token();
        monitor
    }

    /// The currently-held token, if any. May already be expired if the
    /// timer has not fired yet; use [`Self::is_valid`] to check.
    #[must_use]
    pub fn current_token(&self) -> Option<SessionToken> {
        self.inner.token.lock().ok().and_then(|t| t.clone())
    }

    /// True if `token` is still inside its validity window.
    #[must_use]
    pub fn is_valid(token: &SessionToken) -> bool {
        !token.is_expired_at(Utc::now())
    }

    /// True if the monitor holds a token that is still valid.
    #[must_use]
    pub fn has_valid_session(&self) -> bool {
        self.current_token().is_some_and(|t| Self::is_valid(&t))
    }

    /// Register a callback for expiry/logout events.
    ///
    /// Callbacks fire exactly once per expiry, synchronously, in
    /// registration order.
    pub fn on_expiry_or_logout(&self, callback: ExpiryCallback) {
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// Adopt a freshly-issued token (login path): persist it, replace any
    /// previous token, and re-arm the expiry timer.
    pub fn install(&self, token: SessionToken) {
        self.cancel_timer();
        self.inner
            .storage
            .set(storage_keys::AUTH_TOKEN, token.bearer());

        let expires_at = token.expires_at();
        if let Ok(mut slot) = self.inner.token.lock() {
            *slot = Some(token);
        }
        self.arm_timer(expires_at);
    }

    /// Drop the session without firing callbacks (explicit logout - the
    /// caller drives the demotion itself).
    pub fn discard(&self) {
        self.cancel_timer();
        self.inner.storage.remove(storage_keys::AUTH_TOKEN);
        if let Ok(mut slot) = self.inner.token.lock() {
            *slot = None;
        }
    }

    /// Re-read the stored token (tab-visibility path) and reconcile with
    /// the in-memory copy. Returns true if a valid session remains.
    ///
    /// A sibling tab may have logged out (stored token gone) or logged in
    /// again (stored token changed); either way storage is the truth.
    pub fn revalidate(&self) -> bool {
        let stored = self.inner.storage.get(storage_keys::AUTH_TOKEN);
        let held = self.current_token();

        match stored {
            None => {
                if held.is_some() {
                    tracing::debug!("stored token gone, dropping in-memory session");
                    self.cancel_timer();
                    if let Ok(mut slot) = self.inner.token.lock() {
                        *slot = None;
                    }
                }
                false
            }
            Some(raw) => {
                if held.as_ref().is_some_and(|t| t.bearer() == raw) {
                    return self.has_valid_session();
                }
                // A foreign login replaced the token; adopt it
                self.adopt_raw_token(&raw)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn adopt_stored_token(&self) {
        if let Some(raw) = self.inner.storage.get(storage_keys::AUTH_TOKEN) {
            self.adopt_raw_token(&raw);
        }
    }

    /// Parse and adopt a raw stored token. Malformed or expired tokens are
    /// removed from storage immediately. Returns true if a valid session
    /// was adopted.
    fn adopt_raw_token(&self, raw: &str) -> bool {
        match SessionToken::parse(raw) {
            Ok(token) if Self::is_valid(&token) => {
                self.cancel_timer();
                let expires_at = token.expires_at();
                if let Ok(mut slot) = self.inner.token.lock() {
                    *slot = Some(token);
                }
                self.arm_timer(expires_at);
                true
            }
            Ok(_) => {
                tracing::debug!("stored token already expired, discarding");
                self.inner.storage.remove(storage_keys::AUTH_TOKEN);
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "stored token malformed, discarding");
                self.inner.storage.remove(storage_keys::AUTH_TOKEN);
                false
            }
        }
    }

    /// Arm the one-shot timer at the expiry instant.
    fn arm_timer(&self, expires_at: chrono::DateTime<chrono::Utc>) {
        let delay = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                fire_expiry(&inner);
            }
        });

        if let Ok(mut timer) = self.inner.timer.lock() {
            if let Some(old) = timer.replace(handle) {
                old.abort();
            }
        }
    }

    fn cancel_timer(&self) {
        if let Ok(mut timer) = self.inner.timer.lock()
            && let Some(handle) = timer.take()
        {
            handle.abort();
        }
    }
}

/// Timer body: clear the stored token, then notify listeners in order.
fn fire_expiry(inner: &Arc<MonitorInner>) {
    let Some(token) = inner.token.lock().ok().and_then(|mut slot| slot.take()) else {
        return; // logged out before the timer fired
    };

    inner.storage.remove(storage_keys::AUTH_TOKEN);
    tracing::info!(user = %token.user_id(), "session token expired");

    let callbacks: Vec<ExpiryCallback> = inner
        .callbacks
        .lock()
        .map(|cbs| cbs.clone())
        .unwrap_or_default();

    for callback in callbacks {
        callback(token.clone());
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock()
            && let Some(handle) = timer.take()
        {
            handle.abort();
        }
    }
}
