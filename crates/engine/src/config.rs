//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required (HTTP remote only)
//! - `CARTSYNC_REMOTE_URL` - Base URL of the cart/wishlist/coupon API
//!
//! ## Optional
//! - `CARTSYNC_API_TOKEN` - Bearer token for the remote API
//! - `CARTSYNC_DEBOUNCE_MS` - Quantity edit debounce window (default: 300)
//! - `CARTSYNC_REMOVE_DELAY_MS` - Delay before dispatching removals (default: 0)
//! - `CARTSYNC_REQUEST_TIMEOUT_MS` - Remote call timeout (default: 10000)
//! - `CARTSYNC_COUPON_CACHE_TTL_SECS` - Coupon lookup cache TTL (default: 300)
//! - `CARTSYNC_CURRENCY` - ISO 4217 currency code (default: INR)
//! - `CARTSYNC_SHIPPING_FEE` - Flat shipping fee (default: 0)
//! - `CARTSYNC_FREE_SHIPPING_THRESHOLD` - Discounted subtotal for free shipping

use std::time::Duration;

use cartsync_core::CurrencyCode;
use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_REMOVE_DELAY_MS: u64 = 0;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COUPON_CACHE_TTL_SECS: u64 = 300;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Timing and pricing knobs for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a quantity edit waits for further edits before dispatch.
    pub debounce: Duration,
    /// How long a removal waits before dispatch.
    pub remove_delay: Duration,
    /// Upper bound on any single remote call.
    pub request_timeout: Duration,
    /// How long fetched coupons are reused.
    pub coupon_cache_ttl: Duration,
    pub pricing: PricingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            remove_delay: Duration::from_millis(DEFAULT_REMOVE_DELAY_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            coupon_cache_ttl: Duration::from_secs(DEFAULT_COUPON_CACHE_TTL_SECS),
            pricing: PricingConfig::default(),
        }
    }
}

/// Inputs to the totals calculation that are not part of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PricingConfig {
    pub currency: CurrencyCode,
    /// Flat fee charged when the order does not qualify for free shipping.
    pub shipping_fee: Decimal,
    /// Discounted subtotal at or above which shipping is free.
    pub free_shipping_threshold: Option<Decimal>,
}

/// Remote API endpoint configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub api_token: Option<SecretString>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let millis = |key: &str, default: u64| -> Result<Duration, ConfigError> {
            parse_or_default(&lookup, key, default).map(Duration::from_millis)
        };

        Ok(Self {
            debounce: millis("CARTSYNC_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?,
            remove_delay: millis("CARTSYNC_REMOVE_DELAY_MS", DEFAULT_REMOVE_DELAY_MS)?,
            request_timeout: millis("CARTSYNC_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
            coupon_cache_ttl: Duration::from_secs(parse_or_default(
                &lookup,
                "CARTSYNC_COUPON_CACHE_TTL_SECS",
                DEFAULT_COUPON_CACHE_TTL_SECS,
            )?),
            pricing: PricingConfig::from_lookup(&lookup)?,
        })
    }
}

impl PricingConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            currency: parse_or_default(lookup, "CARTSYNC_CURRENCY", CurrencyCode::default())?,
            shipping_fee: parse_or_default(lookup, "CARTSYNC_SHIPPING_FEE", Decimal::ZERO)?,
            free_shipping_threshold: parse_optional(lookup, "CARTSYNC_FREE_SHIPPING_THRESHOLD")?,
        })
    }
}

impl RemoteConfig {
    /// Load remote endpoint configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `CARTSYNC_REMOTE_URL` is missing or not a URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load remote endpoint configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `CARTSYNC_REMOTE_URL` is missing or not a URL.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = get_required(&lookup, "CARTSYNC_REMOTE_URL")?;
        let base_url = Url::parse(&raw).map_err(|e| {
            ConfigError::InvalidEnvVar("CARTSYNC_REMOTE_URL".to_string(), e.to_string())
        })?;
        let api_token = lookup("CARTSYNC_API_TOKEN")
            .filter(|token| !token.is_empty())
            .map(SecretString::from);

        Ok(Self {
            base_url,
            api_token,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required variable.
fn get_required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse a variable, falling back to `default` when it is unset.
fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_optional(lookup, key)?.unwrap_or(default))
}

/// Parse a variable that may be unset.
fn parse_optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
        .transpose()
}
