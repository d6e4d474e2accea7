//! Remote cart gateway - the REST contract to the server's per-user cart.
//!
//! The server is an external collaborator; only its call contract is part
//! of the engine. Two operations: `fetch` the authoritative ledger and
//! `replace` it wholesale. The gateway never retries internally - retry
//! policy belongs to the synchronizer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;
use url::Url;

use copperleaf_core::{QuantityLedger, SessionToken};

use crate::config::CartConfig;
use crate::error::CartError;

/// Interface to the server-persisted, identity-bound cart.
///
/// Every operation requires a valid session token and fails with
/// [`CartError::Unauthorized`] otherwise.
#[async_trait]
pub trait CartGateway: Send + Sync {
    /// The server's current ledger for the identified user; empty if the
    /// user has no server cart yet.
    async fn fetch(&self, token: &SessionToken) -> Result<QuantityLedger, CartError>;

    /// Overwrite the server ledger unconditionally.
    async fn replace(&self, token: &SessionToken, ledger: &QuantityLedger)
    -> Result<(), CartError>;
}

// =============================================================================
// HttpCartGateway
// =============================================================================

/// REST implementation of the gateway.
///
/// `GET {base}/cart` returns the ledger as a flat JSON object; `PUT
/// {base}/cart` with a ledger body replaces it. All calls carry
/// `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct HttpCartGateway {
    inner: Arc<HttpGatewayInner>,
}

struct HttpGatewayInner {
    client: reqwest::Client,
    endpoint: Url,
    request_timeout: Duration,
}

impl HttpCartGateway {
    /// Create a gateway against the configured cart resource.
    #[must_use]
    pub fn new(config: &CartConfig) -> Self {
        // Precompute the endpoint; join() only fails on degenerate bases
        // that CartConfig's URL validation already rejected.
        let endpoint = config
            .api_base_url
            .join("cart")
            .unwrap_or_else(|_| config.api_base_url.clone());

        Self {
            inner: Arc::new(HttpGatewayInner {
                client: reqwest::Client::new(),
                endpoint,
                request_timeout: config.request_timeout,
            }),
        }
    }
}

#[async_trait]
impl CartGateway for HttpCartGateway {
    #[instrument(skip(self, token), fields(user = %token.user_id()))]
    async fn fetch(&self, token: &SessionToken) -> Result<QuantityLedger, CartError> {
        let response = self
            .inner
            .client
            .get(self.inner.endpoint.clone())
            .bearer_auth(token.bearer())
            .timeout(self.inner.request_timeout)
            .send()
            .await
            .map_err(|e| CartError::GatewayUnavailable(e.to_string()))?;

        match triage(response.status()) {
            Disposition::Ok => {}
            Disposition::Unauthorized => return Err(CartError::Unauthorized),
            // A user with no server cart yet reads as empty
            Disposition::NotFound => return Ok(QuantityLedger::new()),
            Disposition::Unavailable(status) => {
                return Err(CartError::GatewayUnavailable(format!("HTTP {status}")));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| CartError::GatewayUnavailable(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok(QuantityLedger::new());
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(200).collect::<String>(),
                "cart gateway returned an unparseable ledger"
            );
            CartError::GatewayUnavailable("invalid ledger payload".to_string())
        })
    }

    #[instrument(skip(self, token, ledger), fields(user = %token.user_id(), items = ledger.total_items()))]
    async fn replace(
        &self,
        token: &SessionToken,
        ledger: &QuantityLedger,
    ) -> Result<(), CartError> {
        let response = self
            .inner
            .client
            .put(self.inner.endpoint.clone())
            .bearer_auth(token.bearer())
            .timeout(self.inner.request_timeout)
            .json(ledger)
            .send()
            .await
            .map_err(|e| CartError::GatewayUnavailable(e.to_string()))?;

        match triage(response.status()) {
            Disposition::Ok => Ok(()),
            Disposition::Unauthorized => Err(CartError::Unauthorized),
            Disposition::NotFound | Disposition::Unavailable(_) => Err(
                CartError::GatewayUnavailable(format!("HTTP {}", response.status())),
            ),
        }
    }
}

/// Map an HTTP status to the engine's error taxonomy.
enum Disposition {
    Ok,
    Unauthorized,
    NotFound,
    Unavailable(reqwest::StatusCode),
}

fn triage(status: reqwest::StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Ok
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        Disposition::Unauthorized
    } else if status == reqwest::StatusCode::NOT_FOUND {
        Disposition::NotFound
    } else {
        Disposition::Unavailable(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_triage() {
        assert!(matches!(triage(reqwest::StatusCode::OK), Disposition::Ok));
        assert!(matches!(
            triage(reqwest::StatusCode::NO_CONTENT),
            Disposition::Ok
        ));
        assert!(matches!(
            triage(reqwest::StatusCode::UNAUTHORIZED),
            Disposition::Unauthorized
        ));
        assert!(matches!(
            triage(reqwest::StatusCode::FORBIDDEN),
            Disposition::Unauthorized
        ));
        assert!(matches!(
            triage(reqwest::StatusCode::NOT_FOUND),
            Disposition::NotFound
        ));
        assert!(matches!(
            triage(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            Disposition::Unavailable(_)
        ));
        assert!(matches!(
            triage(reqwest::StatusCode::BAD_GATEWAY),
            Disposition::Unavailable(_)
        ));
    }

    #[test]
    fn test_endpoint_is_base_plus_cart() {
        let config =
            CartConfig::with_base_url("https://api.example.test/v1/").expect("config");
        let gateway = HttpCartGateway::new(&config);
        assert_eq!(
            gateway.inner.endpoint.as_str(),
            "https://api.example.test/v1/cart"
        );
    }
}
