//! Cart engine error taxonomy.
//!
//! Three failure classes, three policies: `Unauthorized` demotes the
//! session to guest immediately (no retry), `GatewayUnavailable` is
//! retryable with backoff (except on the logout/expiry single-attempt
//! path), and `MalformedToken` is treated as an already-expired session
//! and discarded silently. None of these escape the facade's mutation
//! calls - the UI only ever observes them through `SyncState`.

use thiserror::Error;

use copperleaf_core::TokenError;

/// Errors raised inside the cart engine.
#[derive(Debug, Error)]
pub enum CartError {
    /// The session token is missing, expired, or rejected by the server.
    #[error("unauthorized: session token missing, expired, or rejected")]
    Unauthorized,

    /// The cart gateway could not be reached or answered non-2xx.
    #[error("cart gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The bearer token could not be decoded.
    #[error("malformed session token: {0}")]
    MalformedToken(#[from] TokenError),
}

impl CartError {
    /// True if the failure may be retried with backoff.
    ///
    /// `Unauthorized` and `MalformedToken` never are - both mean the
    /// session is over and retrying would only fail the same way.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_))
    }
}

/// Result type alias for cart engine operations.
pub type Result<T> = std::result::Result<T, CartError>;
