//! Error type for the relay provider client.

use thiserror::Error;

/// Errors that can occur when interacting with the relay provider.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The operation needs a credential that was never configured.
    #[error("Relay provider not configured: {0}")]
    NotConfigured(&'static str),

    /// HTTP request failed (network, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider rejected a create because the account already exists.
    #[error("Account already exists for {0}")]
    AlreadyExists(String),

    /// Request was rejected as malformed before being sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider returned an error payload.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse a provider response.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl RelayError {
    /// Whether the failure is transient enough that the caller may fall
    /// back to a degraded result rather than aborting.
    #[must_use]
    pub const fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Api { .. } | Self::Parse(_))
    }
}
