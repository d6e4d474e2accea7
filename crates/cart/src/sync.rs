//! Cart synchronizer - the Idle/Syncing/Degraded state machine.
//!
//! Decides, on each session-boundary event (login, logout, expiry,
//! tab-visibility), which ledger is authoritative and performs the
//! merge/push. At most one synchronization is in flight; requests that
//! arrive while one is active or scheduled are coalesced into it. The
//! gateway only ever observes the latest ledger - the push payload is
//! always "current ledger at push time", never a queue of deltas.
//!
//! Merge-idempotence invariant: the guest contribution is folded into the
//! local ledger exactly once (at fetch+merge time, before the first push);
//! every retry afterwards replays only the idempotent `replace`, so a
//! retried or repeated login can never double-count.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use copperleaf_core::{SessionToken, UserId};

use crate::config::CartConfig;
use crate::error::CartError;
use crate::gateway::CartGateway;
use crate::session::SessionMonitor;
use crate::store::LocalCartStore;

/// Who the locally-held cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwnership {
    /// No identity; the ledger lives only in local storage.
    Guest,
    /// Bound to an authenticated user and mirrored server-side. The token
    /// itself is owned by the session monitor.
    Identified {
        /// The authenticated user.
        user_id: UserId,
    },
}

/// Why the engine is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// The login-time fetch of the server ledger failed; the merge has
    /// not happened yet and will be replayed whole.
    FetchFailed,
    /// A push failed; the local ledger is provisionally authoritative
    /// until a `replace` lands.
    PushFailed,
}

/// Synchronization status, surfaced to the UI only as an optional
/// "not fully saved" indicator - never something callers block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Local and server ledgers agree (or there is nothing to mirror).
    Idle,
    /// A synchronization is in flight.
    Syncing,
    /// The last attempt failed; a retry is scheduled while the session
    /// remains valid.
    Degraded(DegradedReason),
}

/// What a scheduled backoff retry should replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Full login synchronization: fetch, merge, replace. Only safe while
    /// nothing from this session has been pushed yet.
    LoginMerge,
    /// The idempotent `replace` of the current local ledger.
    Push,
}

/// Mutable control block. Guarded by a std mutex that is never held
/// across an await - decisions are taken under the lock, network happens
/// outside it, results are recorded under it again.
struct Control {
    sync_state: SyncState,
    ownership: CartOwnership,
    /// A gateway call is currently in flight.
    in_flight: bool,
    /// The ledger mutated while a push was in flight; one follow-up push
    /// is owed so the server ends at the latest ledger.
    dirty: bool,
    debounce: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    retry_attempt: u32,
    pending_replay: Option<Replay>,
}

/// Orchestrates merge and push between the local store and the gateway.
///
/// Cheaply cloneable; clones share the same state machine.
#[derive(Clone)]
pub struct CartSynchronizer {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    store: LocalCartStore,
    monitor: SessionMonitor,
    gateway: Arc<dyn CartGateway>,
    debounce: Duration,
    backoff_base: Duration,
    backoff_cap: Duration,
    logout_push_timeout: Duration,
    control: Mutex<Control>,
}

impl CartSynchronizer {
    /// Create a synchronizer wiring the store, monitor, and gateway.
    #[must_use]
    pub fn new(
        store: LocalCartStore,
        monitor: SessionMonitor,
        gateway: Arc<dyn CartGateway>,
        config: &CartConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                store,
                monitor,
                gateway,
                debounce: config.debounce,
                backoff_base: config.backoff_base,
                backoff_cap: config.backoff_cap,
                logout_push_timeout: config.logout_push_timeout,
                control: Mutex::new(Control {
                    sync_state: SyncState::Idle,
                    ownership: CartOwnership::Guest,
                    in_flight: false,
                    dirty: false,
                    debounce: None,
                    retry: None,
                    retry_attempt: 0,
                    pending_replay: None,
                }),
            }),
        }
    }

    /// Current ownership of the locally-held cart.
    #[must_use]
    pub fn ownership(&self) -> CartOwnership {
        self.control().ownership.clone()
    }

    /// Current synchronization status.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.control().sync_state
    }

    // =========================================================================
    // Session-boundary events
    // =========================================================================

    /// Login: adopt the token and reconcile the guest ledger with the
    /// server's (additive merge), pushing the result back.
    ///
    /// A repeated login while already identified skips the merge - the
    /// guest contribution was folded in the first time - and just pushes
    /// the current local ledger, which makes the operation idempotent.
    pub async fn login(&self, token: SessionToken) {
        let user_id = token.user_id().clone();
        self.inner.monitor.install(token);

        let already_identified = {
            let mut control = self.control();
            let already = matches!(control.ownership, CartOwnership::Identified { .. });
            control.ownership = CartOwnership::Identified { user_id };
            already
        };

        if already_identified {
            self.push_current().await;
        } else {
            self.login_merge().await;
        }
    }

    /// Resume an identified session after a reload: the monitor already
    /// holds a still-valid stored token and the stored ledger is the
    /// previous session's mirror, so no merge is owed. A debounced push
    /// repairs any mutation that never made it out before the reload.
    pub fn resume(&self, token: &SessionToken) {
        {
            let mut control = self.control();
            control.ownership = CartOwnership::Identified {
                user_id: token.user_id().clone(),
            };
        }
        self.schedule_debounced_push();
    }

    /// Logout and expiry both land here: one best-effort, timeout-bounded
    /// push of the current local ledger, then demotion to guest. The
    /// local ledger is retained - a lapsed session never erases visible
    /// cart contents.
    pub async fn save_before_logout(&self, token: Option<SessionToken>) {
        // Whatever was scheduled is superseded by this final push
        {
            let mut control = self.control();
            abort_scheduled(&mut control);
            control.pending_replay = None;
            control.dirty = false;
        }

        if let Some(token) = token {
            let ledger = self.inner.store.get();
            let push = self.inner.gateway.replace(&token, &ledger);
            match tokio::time::timeout(self.inner.logout_push_timeout, push).await {
                Ok(Ok(())) => {
                    tracing::info!(items = ledger.total_items(), "cart saved before logout");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "best-effort cart save failed");
                }
                Err(_) => {
                    tracing::warn!("best-effort cart save timed out");
                }
            }
        }

        let mut control = self.control();
        control.ownership = CartOwnership::Guest;
        control.sync_state = SyncState::Idle;
        control.in_flight = false;
        control.retry_attempt = 0;
    }

    /// Monitor-callback entry point: the token just lapsed. Runs the same
    /// single best-effort push as an explicit logout, asynchronously.
    pub fn handle_expiry(&self, token: SessionToken) {
        let sync = self.clone();
        tokio::spawn(async move {
            sync.save_before_logout(Some(token)).await;
        });
    }

    // =========================================================================
    // Mutation path
    // =========================================================================

    /// A local mutation happened while identified: arm (or re-arm) the
    /// debounced push. Bursts of rapid clicks collapse into one `replace`
    /// carrying the ledger as of push time.
    pub fn schedule_debounced_push(&self) {
        let mut control = self.control();

        if !matches!(control.ownership, CartOwnership::Identified { .. }) {
            return;
        }
        if control.in_flight {
            // Coalesce into the active push; one follow-up is owed
            control.dirty = true;
            return;
        }
        if control.retry.is_some() {
            // A backoff push is already scheduled; it reads the ledger at
            // fire time, so this mutation rides along
            return;
        }

        // A newer mutation supersedes the pending debounce
        if let Some(old) = control.debounce.take() {
            old.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.debounce;
        control.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sync) = upgrade(&weak) {
                sync.control().debounce = None;
                sync.push_current().await;
            }
        }));
    }

    // =========================================================================
    // Synchronization bodies
    // =========================================================================

    /// Full login synchronization: fetch, merge, set local, replace.
    async fn login_merge(&self) {
        {
            let mut control = self.control();
            if control.in_flight {
                control.pending_replay = Some(Replay::LoginMerge);
                return;
            }
            control.in_flight = true;
            control.sync_state = SyncState::Syncing;
        }

        let Some(token) = self.valid_token_or_demote() else {
            return;
        };

        let guest = self.inner.store.get();
        let server = match self.inner.gateway.fetch(&token).await {
            Ok(server) => server,
            Err(CartError::Unauthorized) => {
                self.demote_to_guest();
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "login cart fetch failed");
                self.record_failure(DegradedReason::FetchFailed, Replay::LoginMerge);
                return;
            }
        };

        // Fold the guest contribution in exactly once; from here on only
        // the idempotent replace is ever replayed.
        let merged = server.merge(&guest);
        self.inner.store.set(&merged);
        tracing::debug!(
            guest_items = guest.total_items(),
            server_items = server.total_items(),
            merged_items = merged.total_items(),
            "merged guest cart into server cart"
        );

        match self.inner.gateway.replace(&token, &merged).await {
            Ok(()) => self.finish_success(),
            Err(CartError::Unauthorized) => self.demote_to_guest(),
            Err(e) => {
                tracing::warn!(error = %e, "login cart push failed");
                self.record_failure(DegradedReason::PushFailed, Replay::Push);
            }
        }
    }

    /// Push the ledger as it stands right now.
    async fn push_current(&self) {
        {
            let mut control = self.control();
            if !matches!(control.ownership, CartOwnership::Identified { .. }) {
                return;
            }
            if control.in_flight {
                control.dirty = true;
                return;
            }
            control.in_flight = true;
            control.sync_state = SyncState::Syncing;
        }

        let Some(token) = self.valid_token_or_demote() else {
            return;
        };

        let ledger = self.inner.store.get();
        match self.inner.gateway.replace(&token, &ledger).await {
            Ok(()) => self.finish_success(),
            Err(CartError::Unauthorized) => self.demote_to_guest(),
            Err(e) => {
                tracing::warn!(error = %e, "cart push failed");
                self.record_failure(DegradedReason::PushFailed, Replay::Push);
            }
        }
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// Successful sync: settle to Idle, then honor anything that queued
    /// up behind the in-flight call.
    fn finish_success(&self) {
        let (queued_replay, was_dirty) = {
            let mut control = self.control();
            control.in_flight = false;
            control.sync_state = SyncState::Idle;
            control.retry_attempt = 0;
            let replay = control.pending_replay.take();
            let dirty = std::mem::take(&mut control.dirty);
            (replay, dirty)
        };

        if queued_replay == Some(Replay::LoginMerge) {
            let sync = self.clone();
            tokio::spawn(async move {
                sync.login_merge().await;
            });
        } else if was_dirty {
            // The ledger moved while we were pushing; owe one more push
            self.schedule_debounced_push();
        }
    }

    /// Failed sync: degrade and schedule the backoff retry (exponential,
    /// capped, unbounded attempts while the session stays valid).
    fn record_failure(&self, reason: DegradedReason, replay: Replay) {
        let delay = {
            let mut control = self.control();
            control.in_flight = false;
            if !matches!(control.ownership, CartOwnership::Identified { .. }) {
                // Demoted while the call was in flight (expiry or logout
                // raced the push); the session is over, nothing to retry
                return;
            }
            control.sync_state = SyncState::Degraded(reason);
            control.pending_replay = Some(replay);

            let exponent = control.retry_attempt.min(8);
            control.retry_attempt = control.retry_attempt.saturating_add(1);
            let delay = self
                .inner
                .backoff_base
                .saturating_mul(1_u32 << exponent)
                .min(self.inner.backoff_cap);

            if let Some(old) = control.retry.take() {
                old.abort();
            }

            let weak = Arc::downgrade(&self.inner);
            control.retry = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(sync) = upgrade(&weak) else { return };

                let replay = {
                    let mut control = sync.control();
                    control.retry = None;
                    control.pending_replay.take()
                };

                // The session lapsing cancels the retry; the logout path's
                // single best-effort push takes over from here
                if !sync.inner.monitor.has_valid_session() {
                    tracing::debug!("session lapsed, abandoning scheduled retry");
                    return;
                }

                match replay {
                    Some(Replay::LoginMerge) => sync.login_merge().await,
                    Some(Replay::Push) => sync.push_current().await,
                    None => {}
                }
            }));

            delay
        };

        tracing::debug!(retry_in = ?delay, ?reason, "sync degraded, retry scheduled");
    }

    /// The session is over (unauthorized, expired, or logged out):
    /// the token is discarded, ownership reverts to guest, scheduled work
    /// is dropped, and the local ledger is retained.
    fn demote_to_guest(&self) {
        self.inner.monitor.discard();
        let mut control = self.control();
        abort_scheduled(&mut control);
        control.ownership = CartOwnership::Guest;
        control.sync_state = SyncState::Idle;
        control.in_flight = false;
        control.dirty = false;
        control.retry_attempt = 0;
        control.pending_replay = None;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A valid token, or demote and bail.
    fn valid_token_or_demote(&self) -> Option<SessionToken> {
        let token = self
            .inner
            .monitor
            .current_token()
            .filter(SessionMonitor::is_valid);
        if token.is_none() {
            self.demote_to_guest();
        }
        token
    }
}

fn abort_scheduled(control: &mut Control) {
    if let Some(handle) = control.debounce.take() {
        handle.abort();
    }
    if let Some(handle) = control.retry.take() {
        handle.abort();
    }
}

fn upgrade(weak: &Weak<SyncInner>) -> Option<CartSynchronizer> {
    weak.upgrade().map(|inner| CartSynchronizer { inner })
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Ok(mut control) = self.control.lock() {
            abort_scheduled(&mut control);
        }
    }
}
