//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `REMOTE_STORE_URL` - Base URL of the hosted table store (e.g. `https://abc.example.co`)
//! - `REMOTE_STORE_ANON_KEY` - Project anon key sent with every request (high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `REMOTE_STORE_TIMEOUT_SECS` - Per-request timeout (default: transport default)
//! - `CHECKOUT_SHIPPING_FEE` - Flat shipping fee (default: 50)
//! - `CHECKOUT_TAX_RATE` - Tax as a fraction of the subtotal (default: 0.18)
//! - `CHECKOUT_CURRENCY` - ISO currency code for display (default: INR)
//! - `CATALOG_CACHE_TTL_SECS` - Catalog cache lifetime (default: 300)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use bazaar_core::{CurrencyCode, PricingPolicy};

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_CATALOG_CACHE_TTL_SECS: u64 = 300;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Remote table store connection
    pub remote: RemoteStoreConfig,
    /// Checkout pricing
    pub checkout: CheckoutConfig,
    /// How long catalog reads are served from cache
    pub catalog_cache_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Remote table store connection.
///
/// Implements `Debug` manually to redact the anon key.
#[derive(Clone)]
pub struct RemoteStoreConfig {
    /// Base URL; REST and auth paths are appended to it
    pub url: Url,
    /// Project anon key
    pub anon_key: SecretString,
    /// Per-request timeout, if any
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Checkout pricing configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckoutConfig {
    /// Shipping fee and tax rate
    pub policy: PricingPolicy,
    /// Currency used when formatting amounts
    pub currency: CurrencyCode,
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = parse_var("STOREFRONT_HOST", &get_env_or_default("STOREFRONT_HOST", "127.0.0.1"))?;
        let port = parse_var("STOREFRONT_PORT", &get_env_or_default("STOREFRONT_PORT", "3000"))?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;

        let remote = RemoteStoreConfig::from_env()?;
        let checkout = CheckoutConfig::from_env()?;

        let catalog_cache_ttl = Duration::from_secs(parse_var(
            "CATALOG_CACHE_TTL_SECS",
            &get_env_or_default(
                "CATALOG_CACHE_TTL_SECS",
                &DEFAULT_CATALOG_CACHE_TTL_SECS.to_string(),
            ),
        )?);

        Ok(Self {
            host,
            port,
            base_url,
            remote,
            checkout,
            catalog_cache_ttl,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl RemoteStoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = parse_var("REMOTE_STORE_URL", &get_required_env("REMOTE_STORE_URL")?)?;
        let anon_key = get_validated_secret("REMOTE_STORE_ANON_KEY")?;
        let timeout = get_optional_env("REMOTE_STORE_TIMEOUT_SECS")
            .map(|raw| parse_var("REMOTE_STORE_TIMEOUT_SECS", &raw).map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            url,
            anon_key,
            timeout,
        })
    }
}

impl CheckoutConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = PricingPolicy::default();

        let shipping_fee = get_optional_env("CHECKOUT_SHIPPING_FEE")
            .map_or(Ok(defaults.shipping_fee), |raw| {
                parse_shipping_fee("CHECKOUT_SHIPPING_FEE", &raw)
            })?;
        let tax_rate = get_optional_env("CHECKOUT_TAX_RATE")
            .map_or(Ok(defaults.tax_rate), |raw| parse_tax_rate("CHECKOUT_TAX_RATE", &raw))?;
        let currency = get_optional_env("CHECKOUT_CURRENCY")
            .map_or(Ok(CurrencyCode::default()), |raw| {
                raw.parse::<CurrencyCode>()
                    .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_CURRENCY".to_string(), e))
            })?;

        Ok(Self {
            policy: PricingPolicy {
                shipping_fee,
                tax_rate,
            },
            currency,
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

/// Parse a raw value, naming the variable in the error.
fn parse_var<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_shipping_fee(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let fee: Decimal = parse_var(key, raw)?;
    if fee.is_sign_negative() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must not be negative".to_string(),
        ));
    }
    Ok(fee)
}

/// Tax rate is a fraction: 0.18, not 18.
fn parse_tax_rate(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    let rate: Decimal = parse_var(key, raw)?;
    if rate.is_sign_negative() || rate > Decimal::ONE {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("must be a fraction between 0 and 1 (got {rate})"),
        ));
    }
    Ok(rate)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the key issued by the store."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
