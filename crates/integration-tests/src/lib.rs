//! Integration test harness for the Copperleaf cart engine.
//!
//! Scenario tests drive the [`CartFacade`](copperleaf_cart::CartFacade)
//! end to end under tokio's paused virtual clock, against a
//! [`RecordingGateway`] double standing in for the cart REST resource
//! and [`MemoryStorage`](copperleaf_cart::MemoryStorage) standing in for
//! one browser profile (clones of it model concurrent tabs).
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p copperleaf-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use copperleaf_cart::{CartError, CartGateway};
use copperleaf_core::{QuantityLedger, SessionToken};

/// Install a test tracing subscriber once, honoring `RUST_LOG`.
///
/// Call at the top of a test when its output needs explaining.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "copperleaf_cart=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Mint an unsigned bearer token with real `{sub, exp}` claims.
///
/// The engine never validates signatures, so a throwaway header and
/// signature segment are enough.
#[must_use]
pub fn mint_token(sub: &str, exp_epoch_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
    let payload = URL_SAFE_NO_PAD
        .encode(format!("{{\"sub\":\"{sub}\",\"exp\":{exp_epoch_secs}}}").as_bytes());
    format!("{header}.{payload}.sig")
}

/// Mint a token expiring `offset_secs` from now (wall clock).
#[must_use]
pub fn mint_token_expiring_in(sub: &str, offset_secs: i64) -> String {
    mint_token(sub, chrono_now_epoch() + offset_secs)
}

fn chrono_now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

// =============================================================================
// RecordingGateway
// =============================================================================

/// Gateway double: a server-side ledger behind a mutex, every `replace`
/// payload recorded, and scriptable failure counts so tests can exercise
/// the degraded/backoff paths deterministically.
#[derive(Default)]
pub struct RecordingGateway {
    state: Mutex<GatewayState>,
}

#[derive(Default)]
struct GatewayState {
    server: QuantityLedger,
    replace_payloads: Vec<QuantityLedger>,
    fetch_count: u32,
    fail_fetches: u32,
    fail_replaces: u32,
    reject_all: bool,
}

impl RecordingGateway {
    /// An empty server cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A server cart pre-seeded with `ledger`.
    #[must_use]
    pub fn with_server(ledger: QuantityLedger) -> Self {
        let gateway = Self::default();
        gateway.state_mut().server = ledger;
        gateway
    }

    /// Fail the next `n` fetches with `GatewayUnavailable`.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state_mut().fail_fetches = n;
    }

    /// Fail the next `n` replaces with `GatewayUnavailable`.
    pub fn fail_next_replaces(&self, n: u32) {
        self.state_mut().fail_replaces = n;
    }

    /// Reject every call with `Unauthorized`.
    pub fn reject_all(&self, reject: bool) {
        self.state_mut().reject_all = reject;
    }

    /// The server-side ledger as it stands.
    #[must_use]
    pub fn server(&self) -> QuantityLedger {
        self.state_mut().server.clone()
    }

    /// Every `replace` payload observed, in order.
    #[must_use]
    pub fn replace_payloads(&self) -> Vec<QuantityLedger> {
        self.state_mut().replace_payloads.clone()
    }

    /// Number of successful `replace` calls.
    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.state_mut().replace_payloads.len()
    }

    /// Number of `fetch` calls attempted (including scripted failures).
    #[must_use]
    pub fn fetch_count(&self) -> u32 {
        self.state_mut().fetch_count
    }

    fn state_mut(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CartGateway for RecordingGateway {
    async fn fetch(&self, _token: &SessionToken) -> Result<QuantityLedger, CartError> {
        let mut state = self.state_mut();
        state.fetch_count += 1;
        if state.reject_all {
            return Err(CartError::Unauthorized);
        }
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(CartError::GatewayUnavailable("scripted outage".to_string()));
        }
        Ok(state.server.clone())
    }

    async fn replace(
        &self,
        _token: &SessionToken,
        ledger: &QuantityLedger,
    ) -> Result<(), CartError> {
        let mut state = self.state_mut();
        if state.reject_all {
            return Err(CartError::Unauthorized);
        }
        if state.fail_replaces > 0 {
            state.fail_replaces -= 1;
            return Err(CartError::GatewayUnavailable("scripted outage".to_string()));
        }
        state.server = ledger.clone();
        state.replace_payloads.push(ledger.clone());
        Ok(())
    }
}
