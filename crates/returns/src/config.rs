//! Worker configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `RETURNS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional (set in pairs)
//! - `LOGISTICS_API_URL`, `LOGISTICS_API_KEY` - Courier aggregator for pickup booking
//! - `PARTNER_API_URL`, `PARTNER_API_KEY` - Marketplace partner status sync
//! - `SLACK_BOT_TOKEN`, `SLACK_CHANNEL_ID` - Batch announcements
//!
//! ## Optional
//! - `OUTBOX_POLL_SECS` - Seconds between outbox drains (default: 15)
//! - `OUTBOX_BATCH_SIZE` - Messages claimed per drain (default: 50)
//! - `OUTBOX_MAX_ATTEMPTS` - Attempts before a message is parked (default: 8)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`
//!
//! Return policy (window, override, auto-reject) is not environment config;
//! it lives in the `return_settings` row of the settings table.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
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

/// Credentials for one HTTP collaborator.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL; always ends with `/` so endpoints can be joined onto it.
    pub base_url: Url,
    pub api_key: SecretString,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl ApiConfig {
    fn from_env(url_key: &str, key_key: &str) -> Result<Option<Self>, ConfigError> {
        match (get_optional_env(url_key), get_optional_env(key_key)) {
            (Some(url), Some(key)) => {
                validate_secret_strength(&key, key_key)?;
                Ok(Some(Self {
                    base_url: parse_base_url(url_key, &url)?,
                    api_key: SecretString::from(key),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                format!("{url_key}/{key_key}"),
                "both must be set together".to_string(),
            )),
        }
    }
}

/// Slack configuration for batch announcements.
#[derive(Clone)]
pub struct SlackConfig {
    /// Slack bot token (xoxb-...).
    pub bot_token: SecretString,
    pub channel_id: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl SlackConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        match (
            get_optional_env("SLACK_BOT_TOKEN"),
            get_optional_env("SLACK_CHANNEL_ID"),
        ) {
            (Some(token), Some(channel_id)) => {
                if let Err(e) = validate_secret_strength(&token, "SLACK_BOT_TOKEN") {
                    tracing::warn!("SLACK_BOT_TOKEN validation warning: {e}");
                }
                Ok(Some(Self {
                    bot_token: SecretString::from(token),
                    channel_id,
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SLACK_*".to_string(),
                "Both SLACK_BOT_TOKEN and SLACK_CHANNEL_ID must be set together".to_string(),
            )),
        }
    }
}

/// Outbox worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            batch_size: 50,
            max_attempts: 8,
        }
    }
}

impl OutboxConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: Duration::from_secs(parse_env_or(
                "OUTBOX_POLL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            batch_size: parse_env_or("OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            max_attempts: parse_env_or("OUTBOX_MAX_ATTEMPTS", defaults.max_attempts)?,
        })
    }
}

/// Return engine configuration.
#[derive(Debug, Clone)]
pub struct ReturnsConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Courier aggregator; pickups can only be entered manually without it.
    pub logistics: Option<ApiConfig>,
    /// Marketplace partner status sync.
    pub partner: Option<ApiConfig>,
    pub slack: Option<SlackConfig>,
    pub outbox: OutboxConfig,
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
}

impl ReturnsConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, paired
    /// variables are half set, or an API key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_database_url("RETURNS_DATABASE_URL")?,
            logistics: ApiConfig::from_env("LOGISTICS_API_URL", "LOGISTICS_API_KEY")?,
            partner: ApiConfig::from_env("PARTNER_API_URL", "PARTNER_API_KEY")?,
            slack: SlackConfig::from_env()?,
            outbox: OutboxConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: get_optional_env("SENTRY_SAMPLE_RATE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating empty as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an optional environment variable, falling back to `default`.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Parse a base URL, adding the trailing slash `Url::join` needs.
fn parse_base_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
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
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_placeholder_key_is_rejected() {
        let err = validate_secret_strength("your-courier-key", "LOGISTICS_API_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_low_entropy_key_is_rejected() {
        assert!(validate_secret_strength("aaaaaaaaaaaaaaaaaaaa", "PARTNER_API_KEY").is_err());
    }

    #[test]
    fn test_random_key_is_accepted() {
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "PARTNER_API_KEY").is_ok());
    }

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let url = parse_base_url("X", "https://couriers.test/api/v2").unwrap();
        assert_eq!(url.as_str(), "https://couriers.test/api/v2/");
        assert_eq!(
            url.join("pickups").unwrap().as_str(),
            "https://couriers.test/api/v2/pickups"
        );
    }

    #[test]
    fn test_base_url_must_parse() {
        assert!(matches!(
            parse_base_url("LOGISTICS_API_URL", "not a url"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
    }

    #[test]
    fn test_api_config_debug_redacts_key() {
        let config = ApiConfig {
            base_url: Url::parse("https://partner.test/").unwrap(),
            api_key: SecretString::from("pk_live_9fK2mQ7xR4"),
        };
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("partner.test"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("pk_live_9fK2mQ7xR4"));
    }

    #[test]
    fn test_outbox_defaults() {
        let config = OutboxConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_attempts, 8);
    }
}
