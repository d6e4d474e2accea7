//! Cart engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the cart REST resource
//!
//! ## Optional
//! - `CART_LOGIN_PATH` - Authentication page path (default: /login)
//! - `CART_DEBOUNCE_MS` - Push debounce window (default: 500)
//! - `CART_BACKOFF_BASE_MS` - Retry backoff base delay (default: 1000)
//! - `CART_BACKOFF_CAP_MS` - Retry backoff delay cap (default: 30000)
//! - `CART_REQUEST_TIMEOUT_MS` - Per-request gateway timeout (default: 10000)
//! - `CART_LOGOUT_PUSH_TIMEOUT_MS` - Best-effort logout push bound (default: 2000)
//! - `CART_STORAGE_PATH` - Durable storage file (default: in-memory only)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart engine configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Base URL of the cart REST resource (the `/cart` path is appended)
    pub api_base_url: Url,
    /// Path of the authentication page checkout gating redirects to
    pub login_path: String,
    /// Quiet window that collapses a burst of mutations into one push
    pub debounce: Duration,
    /// First retry delay after a failed synchronization
    pub backoff_base: Duration,
    /// Upper bound on the retry delay
    pub backoff_cap: Duration,
    /// Per-request timeout for gateway calls
    pub request_timeout: Duration,
    /// Bound on the single best-effort push during logout/expiry
    pub logout_push_timeout: Duration,
    /// Durable storage file; `None` keeps the profile in memory
    pub storage_path: Option<PathBuf>,
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = get_required_env("CART_API_BASE_URL")?;
        let api_base_url = Url::parse(&api_base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("CART_API_BASE_URL".to_string(), e.to_string())
        })?;

        Ok(Self {
            api_base_url,
            login_path: get_env_or_default("CART_LOGIN_PATH", "/login"),
            debounce: get_duration_ms("CART_DEBOUNCE_MS", 500)?,
            backoff_base: get_duration_ms("CART_BACKOFF_BASE_MS", 1_000)?,
            backoff_cap: get_duration_ms("CART_BACKOFF_CAP_MS", 30_000)?,
            request_timeout: get_duration_ms("CART_REQUEST_TIMEOUT_MS", 10_000)?,
            logout_push_timeout: get_duration_ms("CART_LOGOUT_PUSH_TIMEOUT_MS", 2_000)?,
            storage_path: get_optional_env("CART_STORAGE_PATH").map(PathBuf::from),
        })
    }

    /// A configuration with every optional knob at its default, for a
    /// gateway at `api_base_url`. Used by tests and embedding hosts that
    /// configure programmatically instead of via the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `api_base_url` is not a valid URL.
    pub fn with_base_url(api_base_url: &str) -> Result<Self, ConfigError> {
        let api_base_url = Url::parse(api_base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("CART_API_BASE_URL".to_string(), e.to_string())
        })?;
        Ok(Self {
            api_base_url,
            login_path: "/login".to_string(),
            debounce: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            logout_push_timeout: Duration::from_secs(2),
            storage_path: None,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a millisecond duration from the environment, with a default.
fn get_duration_ms(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    let millis = match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?,
        Err(_) => default_ms,
    };
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_with_base_url_defaults() {
        let config = CartConfig::with_base_url("https://api.example.test").unwrap();
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_cap, Duration::from_secs(30));
        assert_eq!(config.login_path, "/login");
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_with_base_url_rejects_garbage() {
        let result = CartConfig::with_base_url("not a url");
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))));
    }
}
