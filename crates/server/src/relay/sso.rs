//! SSO link generation through the provider's plugin endpoint.

use relaylink_core::RelayUserId;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use super::client::RelayClient;
use super::error::RelayError;

/// Plugin name registered on the provider side.
const PLUGIN_NAME: &str = "shopify-sso";

/// Hosts that may serve SSO URLs over plain HTTP (local development).
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Plugin response payload. The URL sometimes arrives at the top level
/// instead of under `data`, so both shapes are accepted.
#[derive(Debug, Deserialize)]
struct SsoPayload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    data: Option<SsoData>,
}

#[derive(Debug, Deserialize)]
struct SsoData {
    #[serde(default)]
    url: Option<String>,
}

impl RelayClient {
    /// Create a one-time SSO login URL for a provider account.
    ///
    /// `redirect` is a path inside the provider dashboard (for example
    /// `dashboard` or `settings/api`). It is restricted to alphanumerics,
    /// slash, underscore and dash, and may not start with `/` or contain
    /// `..`.
    ///
    /// The returned URL is only accepted if its host is one of the
    /// provider's known hostnames and it uses HTTPS (plain HTTP is
    /// allowed for local hosts only).
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a plugin token, `InvalidInput` on
    /// a bad user id or redirect path, and `Parse` if the provider hands
    /// back a URL that fails validation.
    #[instrument(skip(self))]
    pub async fn create_sso_link(
        &self,
        user_id: RelayUserId,
        redirect: &str,
    ) -> Result<String, RelayError> {
        let config = self.config();
        let token = config
            .sso_plugin_token
            .as_ref()
            .ok_or(RelayError::NotConfigured("SSO plugin token"))?;

        if !user_id.is_positive() {
            return Err(RelayError::InvalidInput("user id must be positive".to_string()));
        }
        validate_redirect_path(redirect)?;

        // The plugin endpoint lives at the web root, not under /admin.
        let url = format!("{}/plugin", config.web_base_url);
        let response = self
            .inner
            .client
            .get(&url)
            .query(&[
                ("name", PLUGIN_NAME),
                ("action", "sso_link"),
                ("user", &user_id.to_string()),
                ("token", token.expose_secret()),
                ("redirect", redirect),
            ])
            .send()
            .await?;

        let http_status = response.status().as_u16();
        let payload: SsoPayload = response
            .json()
            .await
            .map_err(|_| RelayError::Parse("Unable to parse SSO response".to_string()))?;

        let sso_url = payload
            .data
            .and_then(|d| d.url)
            .or(payload.url)
            .filter(|u| !u.is_empty());

        let Some(sso_url) = sso_url else {
            return Err(RelayError::Api {
                status: http_status,
                message: "SSO link request returned no URL".to_string(),
            });
        };

        validate_sso_url(&sso_url, &config.sso_allowed_hosts())?;
        Ok(sso_url)
    }
}

/// Reject redirect paths that could escape the provider dashboard.
fn validate_redirect_path(redirect: &str) -> Result<(), RelayError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-');
    if redirect.is_empty() || !redirect.chars().all(allowed) {
        return Err(RelayError::InvalidInput("invalid redirect path".to_string()));
    }
    if redirect.contains("..") || redirect.starts_with('/') {
        return Err(RelayError::InvalidInput("invalid redirect path".to_string()));
    }
    Ok(())
}

/// Validate a provider-issued SSO URL: known host, HTTPS enforced.
fn validate_sso_url(sso_url: &str, allowed_hosts: &[String]) -> Result<(), RelayError> {
    let parsed = Url::parse(sso_url)
        .map_err(|_| RelayError::Parse("Invalid SSO URL received".to_string()))?;

    let Some(host) = parsed.host_str() else {
        return Err(RelayError::Parse("SSO URL has no host".to_string()));
    };

    let is_local = LOCAL_HOSTS.contains(&host);
    if !is_local && !allowed_hosts.iter().any(|h| h == host) {
        return Err(RelayError::Parse(format!("SSO URL from unauthorized host '{host}'")));
    }

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if is_local => Ok(()),
        other => Err(RelayError::Parse(format!("SSO URL uses disallowed scheme '{other}'"))),
    }
}
