//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `SERVER_BASE_URL` - Public URL of this service
//! - `SHOPIFY_WEBHOOK_SECRET` - Shopify app secret used to verify webhook HMACs
//! - `SMTP_HOST` - SMTP server hostname
//! - `SMTP_USERNAME` - SMTP authentication username
//! - `SMTP_PASSWORD` - SMTP authentication password
//! - `SMTP_FROM` - Email sender address
//!
//! ## Optional
//! - `SERVER_HOST` - Bind address (default: 127.0.0.1)
//! - `SERVER_PORT` - Listen port (default: 3002)
//! - `SMTP_PORT` - SMTP port (default: 587)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` / `SENTRY_TRACES_SAMPLE_RATE` - Sampling (default 1.0)
//!
//! ## Relay provider
//! - `RELAY_ADMIN_BASE_URL` - Admin API base (default: https://hoprelay.com/admin)
//! - `RELAY_API_BASE_URL` - Messaging API base (default: https://hoprelay.com/api)
//! - `RELAY_WEB_BASE_URL` - Public web base; defaults to the admin base with a
//!   trailing `/admin` stripped
//! - `RELAY_SYSTEM_TOKEN` - Privileged admin token (optional; without it the
//!   service runs in the degraded no-listing mode)
//! - `RELAY_SSO_PLUGIN_TOKEN` - Token for the SSO plugin endpoint (optional)
//! - `RELAY_DEFAULT_COUNTRY` (default: US)
//! - `RELAY_DEFAULT_TIMEZONE` (default: America/New_York)
//! - `RELAY_DEFAULT_LANGUAGE_ID` (default: 1)
//! - `RELAY_DEFAULT_ROLE_ID` (default: 2)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "your_",
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

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL of this service
    pub base_url: String,
    /// Shopify app secret for webhook HMAC verification
    pub shopify_webhook_secret: SecretString,
    /// Relay provider configuration
    pub relay: RelayConfig,
    /// Email (SMTP) configuration
    pub email: EmailConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Relay provider configuration.
///
/// Implements `Debug` manually to redact the privileged tokens. Both
/// tokens are optional: without a system token the service cannot list
/// or create users through the admin surface (existence checks become
/// indeterminate), and without a plugin token SSO links are unavailable.
#[derive(Clone)]
pub struct RelayConfig {
    /// Admin API base URL (privileged surface), e.g. `https://hoprelay.com/admin`
    pub admin_base_url: String,
    /// Messaging API base URL (secret-authenticated surface)
    pub api_base_url: String,
    /// Public web base URL (registration, login, plugin endpoints)
    pub web_base_url: String,
    /// Privileged admin token (user listing/creation, API keys, plans)
    pub system_token: Option<SecretString>,
    /// Token for the SSO plugin endpoint
    pub sso_plugin_token: Option<SecretString>,
    /// Default country for created accounts
    pub default_country: String,
    /// Default timezone for created accounts
    pub default_timezone: String,
    /// Default language id for created accounts
    pub default_language_id: String,
    /// Default role id for created accounts
    pub default_role_id: String,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("admin_base_url", &self.admin_base_url)
            .field("api_base_url", &self.api_base_url)
            .field("web_base_url", &self.web_base_url)
            .field("system_token", &self.system_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "sso_plugin_token",
                &self.sso_plugin_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("default_country", &self.default_country)
            .field("default_timezone", &self.default_timezone)
            .finish_non_exhaustive()
    }
}

impl RelayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let admin_base_url = get_env_or_default("RELAY_ADMIN_BASE_URL", "https://hoprelay.com/admin");
        let api_base_url = get_env_or_default("RELAY_API_BASE_URL", "https://hoprelay.com/api");
        // Plugin and auth endpoints live at the web root, not under /admin.
        let web_base_url = get_optional_env("RELAY_WEB_BASE_URL")
            .unwrap_or_else(|| strip_admin_suffix(&admin_base_url));

        Ok(Self {
            admin_base_url: trim_trailing_slash(&admin_base_url),
            api_base_url: trim_trailing_slash(&api_base_url),
            web_base_url: trim_trailing_slash(&web_base_url),
            system_token: get_usable_token("RELAY_SYSTEM_TOKEN"),
            sso_plugin_token: get_usable_token("RELAY_SSO_PLUGIN_TOKEN"),
            default_country: get_env_or_default("RELAY_DEFAULT_COUNTRY", "US"),
            default_timezone: get_env_or_default("RELAY_DEFAULT_TIMEZONE", "America/New_York"),
            default_language_id: get_env_or_default("RELAY_DEFAULT_LANGUAGE_ID", "1"),
            default_role_id: get_env_or_default("RELAY_DEFAULT_ROLE_ID", "2"),
        })
    }

    /// Hostnames an SSO redirect URL may resolve to: the provider's
    /// canonical domains plus whatever the configured base URLs point at
    /// (covers staging and self-hosted deployments).
    #[must_use]
    pub fn sso_allowed_hosts(&self) -> Vec<String> {
        let mut hosts = vec!["hoprelay.com".to_owned(), "www.hoprelay.com".to_owned()];
        for base in [&self.admin_base_url, &self.web_base_url] {
            if let Ok(url) = Url::parse(base)
                && let Some(host) = url.host_str()
                && !hosts.iter().any(|h| h == host)
            {
                hosts.push(host.to_owned());
            }
        }
        hosts
    }
}

/// Email (SMTP) configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl EmailConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let smtp_port = get_env_or_default("SMTP_PORT", "587")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("SMTP_PORT".to_string(), e.to_string()))?;

        Ok(Self {
            smtp_host: get_required_env("SMTP_HOST")?,
            smtp_port,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_validated_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("SMTP_FROM")?,
        })
    }
}

impl AppConfig {
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

        let database_url = get_required_secret("DATABASE_URL")?;
        let host = get_env_or_default("SERVER_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("SERVER_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("SERVER_PORT", "3002")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("SERVER_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("SERVER_BASE_URL")?;
        let shopify_webhook_secret = get_validated_secret("SHOPIFY_WEBHOOK_SECRET")?;

        let relay = RelayConfig::from_env()?;
        let email = EmailConfig::from_env()?;

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            shopify_webhook_secret,
            relay,
            email,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Strip a trailing `/admin` path segment from a base URL.
fn strip_admin_suffix(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    trimmed
        .strip_suffix("/admin")
        .unwrap_or(trimmed)
        .to_string()
}

/// Drop a trailing slash so joins can always use `{base}/path`.
fn trim_trailing_slash(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Load an optional token, dropping obvious placeholder values.
///
/// Deployments frequently ship with the sample `.env` untouched; a
/// placeholder token must behave like an absent one (privileged
/// operations report `NotConfigured` instead of confusing 401s).
fn get_usable_token(key: &str) -> Option<SecretString> {
    let value = get_optional_env(key)?;
    if let Err(e) = validate_secret_strength(&value, key) {
        tracing::warn!("{key} looks like a placeholder and will be ignored: {e}");
        return None;
    }
    Some(SecretString::from(value))
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
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API tokens have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        // All same character = 0 entropy
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_high() {
        let entropy = shannon_entropy("aB3$xY9!mK2@nL5#");
        assert!(entropy > 3.3);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your_relay_system_token_here", "TEST_VAR");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        // High-entropy random string
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_strip_admin_suffix() {
        assert_eq!(
            strip_admin_suffix("https://hoprelay.com/admin"),
            "https://hoprelay.com"
        );
        assert_eq!(
            strip_admin_suffix("https://hoprelay.com/admin/"),
            "https://hoprelay.com"
        );
        assert_eq!(
            strip_admin_suffix("https://relay.example.net"),
            "https://relay.example.net"
        );
    }

    #[test]
    fn test_sso_allowed_hosts_includes_configured_bases() {
        let relay = RelayConfig {
            admin_base_url: "https://relay.example.net/admin".to_string(),
            api_base_url: "https://relay.example.net/api".to_string(),
            web_base_url: "https://relay.example.net".to_string(),
            system_token: None,
            sso_plugin_token: None,
            default_country: "US".to_string(),
            default_timezone: "America/New_York".to_string(),
            default_language_id: "1".to_string(),
            default_role_id: "2".to_string(),
        };

        let hosts = relay.sso_allowed_hosts();
        assert!(hosts.iter().any(|h| h == "hoprelay.com"));
        assert!(hosts.iter().any(|h| h == "relay.example.net"));
        // No duplicates even though two bases share a host
        assert_eq!(
            hosts.iter().filter(|h| *h == "relay.example.net").count(),
            1
        );
    }

    #[test]
    fn test_relay_config_debug_redacts_tokens() {
        let relay = RelayConfig {
            admin_base_url: "https://hoprelay.com/admin".to_string(),
            api_base_url: "https://hoprelay.com/api".to_string(),
            web_base_url: "https://hoprelay.com".to_string(),
            system_token: Some(SecretString::from("sk9$v2mQ8pL4nR7w")),
            sso_plugin_token: None,
            default_country: "US".to_string(),
            default_timezone: "America/New_York".to_string(),
            default_language_id: "1".to_string(),
            default_role_id: "2".to_string(),
        };

        let debug_output = format!("{relay:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sk9$v2mQ8pL4nR7w"));
    }

    #[test]
    fn test_email_config_debug_redacts_secrets() {
        let config = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_username: "notify@example.com".to_string(),
            smtp_password: SecretString::from("super_secret_smtp_password"),
            from_address: "noreply@example.com".to_string(),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("smtp.example.com"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_smtp_password"));
    }
}
