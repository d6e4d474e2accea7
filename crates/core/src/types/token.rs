//! Session bearer token with embedded expiry claims.
//!
//! The authentication service issues a JWT-shaped bearer token. The cart
//! engine only needs the `sub` and `exp` claims, so parsing here
//! base64url-decodes the payload segment and reads the JSON - the
//! signature is deliberately NOT validated (that is the auth service's
//! job; this client only decides when to stop trusting its own copy).

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

use super::id::UserId;

/// Errors from decoding a bearer token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token does not have the three dot-separated JWT segments.
    #[error("malformed token: expected three segments")]
    MalformedStructure,

    /// The payload segment is not valid base64url.
    #[error("malformed token payload: {0}")]
    PayloadEncoding(#[from] base64::DecodeError),

    /// The payload JSON is missing or has invalid claims.
    #[error("invalid token claims: {0}")]
    InvalidClaims(#[from] serde_json::Error),

    /// The `exp` claim does not denote a representable instant.
    #[error("expiry claim out of range: {0}")]
    ExpiryOutOfRange(i64),
}

/// Claims the cart engine reads from the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Subject - the authenticated user's identifier.
    pub sub: UserId,
    /// Expiry instant in epoch seconds.
    pub exp: i64,
}

/// An opaque bearer credential with an embedded expiry window.
///
/// Owned by the session monitor; read-only to every other component. The
/// raw value is held behind [`SecretString`] and redacted from `Debug`.
#[derive(Clone)]
pub struct SessionToken {
    raw: SecretString,
    claims: TokenClaims,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Parse a raw bearer token, decoding the `{sub, exp}` claims.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` if the token is not three-segment JWT shaped,
    /// the payload is not base64url JSON, or the claims are missing or
    /// unrepresentable. Callers treat every variant identically: the token
    /// is discarded, never retried.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let mut segments = raw.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::MalformedStructure);
        };

        let decoded = URL_SAFE_NO_PAD.decode(payload)?;
        let claims: TokenClaims = serde_json::from_slice(&decoded)?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(TokenError::ExpiryOutOfRange(claims.exp))?;

        Ok(Self {
            raw: SecretString::from(raw.to_string()),
            claims,
            expires_at,
        })
    }

    /// The raw bearer value, for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> &str {
        self.raw.expose_secret()
    }

    /// The authenticated user this token identifies.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.claims.sub
    }

    /// The instant at which the token stops being valid.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True if the token is expired at `now` (`now >= exp`).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("raw", &"[REDACTED]")
            .field("sub", &self.claims.sub)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an unsigned token the way the tests mint them: real claims,
    /// throwaway header and signature segments.
    fn mint(sub: &str, exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"none\"}");
        let payload =
            URL_SAFE_NO_PAD.encode(format!("{{\"sub\":\"{sub}\",\"exp\":{exp}}}").as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_parse_reads_claims() {
        let token = SessionToken::parse(&mint("u-1", 2_000_000_000)).expect("parse");
        assert_eq!(token.user_id().as_str(), "u-1");
        assert_eq!(token.expires_at().timestamp(), 2_000_000_000);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let token = SessionToken::parse(&mint("u-1", 1_000)).expect("parse");
        let exactly = Utc.timestamp_opt(1_000, 0).single().expect("instant");
        assert!(token.is_expired_at(exactly));
        assert!(!token.is_expired_at(exactly - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_rejects_wrong_segment_count() {
        assert!(matches!(
            SessionToken::parse("not-a-jwt"),
            Err(TokenError::MalformedStructure)
        ));
        assert!(matches!(
            SessionToken::parse("a.b.c.d"),
            Err(TokenError::MalformedStructure)
        ));
    }

    #[test]
    fn test_rejects_garbage_payload() {
        assert!(SessionToken::parse("aGVhZA.!!!not-base64!!!.sig").is_err());

        let bad_claims = URL_SAFE_NO_PAD.encode(b"{\"sub\":\"u-1\"}");
        assert!(matches!(
            SessionToken::parse(&format!("h.{bad_claims}.s")),
            Err(TokenError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_debug_redacts_raw_value() {
        let raw = mint("u-1", 2_000_000_000);
        let token = SessionToken::parse(&raw).expect("parse");
        let debug = format!("{token:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&raw));
    }
}
