//! Core relay provider client: admin and messaging API surfaces.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use relaylink_core::{ApiKeyId, Email, PlanId, RelayUserId};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::config::RelayConfig;

use super::error::RelayError;
use super::types::{
    API_KEY_BASE_PERMISSIONS, API_KEY_SMS_PERMISSIONS, API_KEY_WA_PERMISSIONS, ApiEnvelope, ApiKey,
    Package, RelayUser, UserLookup,
};

/// Request timeout for all provider calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Users fetched per admin listing page.
const PAGE_LIMIT: usize = 250;

/// Hard cap on listing pages scanned during an email search.
const MAX_PAGES: usize = 200;

/// Relay provider API client.
///
/// Cheap to clone; state is shared behind an `Arc`.
#[derive(Clone)]
pub struct RelayClient {
    pub(super) inner: Arc<RelayClientInner>,
}

pub(super) struct RelayClientInner {
    pub(super) client: reqwest::Client,
    pub(super) config: RelayConfig,
}

impl RelayClient {
    /// Create a new provider client.
    ///
    /// Redirects are never followed automatically: the login-based
    /// password check inspects `Location` headers itself, and the JSON
    /// endpoints do not redirect.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            inner: Arc::new(RelayClientInner { client, config }),
        })
    }

    #[must_use]
    pub(super) fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// The privileged admin token, or `NotConfigured`.
    pub(super) fn system_token(&self) -> Result<&SecretString, RelayError> {
        self.inner
            .config
            .system_token
            .as_ref()
            .ok_or(RelayError::NotConfigured("system token"))
    }

    /// Parse a JSON envelope, mapping in-band error statuses.
    pub(super) async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<ApiEnvelope<T>, RelayError> {
        let http_status = response.status().as_u16();
        let body = response.text().await?;

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body)
            .map_err(|_| RelayError::Parse("Unable to parse provider response".to_string()))?;

        if !(200..300).contains(&http_status) || !envelope.is_success() {
            let message = envelope
                .message_text()
                .map_or_else(|| format!("Provider request failed with status {http_status}"), String::from);
            return Err(RelayError::Api {
                status: envelope.status.unwrap_or(http_status),
                message,
            });
        }

        Ok(envelope)
    }

    /// Call a messaging API endpoint authenticated by an API key secret.
    ///
    /// POSTs the secret as a form field; some deployments only accept the
    /// secret as a query parameter on GET, so 404/405 falls back to that.
    async fn api_with_secret<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        secret: &SecretString,
    ) -> Result<ApiEnvelope<T>, RelayError> {
        let url = format!("{}{endpoint}", self.inner.config.api_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[("secret", secret.expose_secret())])
            .send()
            .await?;

        let status = response.status().as_u16();
        if status == 404 || status == 405 {
            let response = self
                .inner
                .client
                .get(&url)
                .query(&[("secret", secret.expose_secret())])
                .send()
                .await?;
            return Self::parse_envelope(response).await;
        }

        Self::parse_envelope(response).await
    }

    // ===== Admin API: users =====

    /// Look up a provider account by email address.
    ///
    /// The admin API has no search parameter, so this walks the user
    /// listing page by page and compares emails case-insensitively. The
    /// scan stops at a short page, an empty page, or the page cap.
    ///
    /// Returns `Indeterminate` when the check cannot run: no system token,
    /// or the admin surface failed mid-scan. Absence is only reported
    /// after a complete scan.
    ///
    /// # Errors
    ///
    /// Infallible in practice; upstream failures fold into `Indeterminate`.
    #[instrument(skip(self))]
    pub async fn find_user_by_email(&self, email: &Email) -> Result<UserLookup, RelayError> {
        let Ok(token) = self.system_token() else {
            return Ok(UserLookup::Indeterminate);
        };

        for page in 1..=MAX_PAGES {
            let url = format!("{}/get/users", self.inner.config.admin_base_url);
            let result = async {
                let response = self
                    .inner
                    .client
                    .get(&url)
                    .query(&[
                        ("token", token.expose_secret()),
                        ("limit", &PAGE_LIMIT.to_string()),
                        ("page", &page.to_string()),
                    ])
                    .send()
                    .await?;
                Self::parse_envelope::<Vec<RelayUser>>(response).await
            }
            .await;

            let users = match result {
                Ok(envelope) => envelope.data.unwrap_or_default(),
                Err(e) => {
                    warn!(page, error = %e, "User listing failed mid-scan");
                    return Ok(UserLookup::Indeterminate);
                }
            };

            if users.is_empty() {
                return Ok(UserLookup::NotFound);
            }

            let page_len = users.len();
            if let Some(found) = users
                .into_iter()
                .find(|u| u.email.as_deref().is_some_and(|e| email.matches(e)))
            {
                return Ok(UserLookup::Found(found));
            }

            if page_len < PAGE_LIMIT {
                return Ok(UserLookup::NotFound);
            }
        }

        // Every page up to the cap was full, so the listing keeps going;
        // the scan is incomplete and proves nothing about absence.
        warn!(pages = MAX_PAGES, "User listing scan hit the page cap");
        Ok(UserLookup::Indeterminate)
    }

    /// Create a provider account through the privileged admin endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the provider rejects the email as
    /// taken (it signals this as `400 Invalid Parameters!`), or
    /// `NotConfigured` without a system token.
    #[instrument(skip(self, password))]
    pub async fn create_user_privileged(
        &self,
        name: &str,
        email: &Email,
        password: &str,
    ) -> Result<RelayUser, RelayError> {
        let token = self.system_token()?;
        let config = &self.inner.config;
        let url = format!("{}/create/user", config.admin_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[
                ("token", token.expose_secret()),
                ("name", name),
                ("email", email.as_str()),
                ("password", password),
                ("timezone", &config.default_timezone),
                ("country", &config.default_country),
                ("language", &config.default_language_id),
                ("role", &config.default_role_id),
            ])
            .send()
            .await?;

        let envelope = match Self::parse_envelope::<RelayUser>(response).await {
            Err(RelayError::Api { status: 400, message }) if message == "Invalid Parameters!" => {
                return Err(RelayError::AlreadyExists(email.to_string()));
            }
            other => other?,
        };

        envelope
            .data
            .ok_or_else(|| RelayError::Parse("Account creation returned no user".to_string()))
    }

    // ===== Admin API: packages and subscriptions =====

    /// List subscription packages offered by the provider.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a system token, or provider errors.
    #[instrument(skip(self))]
    pub async fn list_packages(&self) -> Result<Vec<Package>, RelayError> {
        let token = self.system_token()?;
        let url = format!("{}/get/packages", self.inner.config.admin_base_url);

        let response = self
            .inner
            .client
            .get(&url)
            .query(&[
                ("token", token.expose_secret()),
                ("limit", "10"),
                ("page", "1"),
            ])
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<Package>> = Self::parse_envelope(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Subscribe a provider account to a package.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a system token, or provider errors.
    #[instrument(skip(self))]
    pub async fn create_subscription(
        &self,
        user_id: RelayUserId,
        package_id: PlanId,
        duration_months: u32,
    ) -> Result<serde_json::Value, RelayError> {
        let token = self.system_token()?;
        let url = format!("{}/create/subscription", self.inner.config.admin_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[
                ("token", token.expose_secret()),
                ("user", &user_id.to_string()),
                ("package", &package_id.to_string()),
                ("duration", &duration_months.to_string()),
            ])
            .send()
            .await?;

        let envelope: ApiEnvelope<serde_json::Value> = Self::parse_envelope(response).await?;
        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    }

    // ===== Admin API: API keys =====

    /// Issue an API key for a provider account: the base read scopes
    /// plus send scopes for whichever channels the merchant enabled.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a system token, or provider errors.
    #[instrument(skip(self))]
    pub async fn create_api_key(
        &self,
        user_id: RelayUserId,
        name: &str,
        sms_enabled: bool,
        whatsapp_enabled: bool,
    ) -> Result<ApiKey, RelayError> {
        let token = self.system_token()?;
        let url = format!("{}/create/apikey", self.inner.config.admin_base_url);

        let mut permissions: Vec<&str> = API_KEY_BASE_PERMISSIONS.to_vec();
        if sms_enabled {
            permissions.extend(API_KEY_SMS_PERMISSIONS);
        }
        if whatsapp_enabled {
            permissions.extend(API_KEY_WA_PERMISSIONS);
        }

        let mut form: Vec<(&str, String)> = vec![
            ("token", token.expose_secret().to_string()),
            ("id", user_id.to_string()),
            ("name", name.to_string()),
        ];
        for permission in permissions {
            form.push(("permissions[]", permission.to_string()));
        }

        let response = self.inner.client.post(&url).form(&form).send().await?;

        let envelope: ApiEnvelope<ApiKey> = Self::parse_envelope(response).await?;
        envelope
            .data
            .ok_or_else(|| RelayError::Parse("Key creation returned no key".to_string()))
    }

    /// List API keys belonging to a provider account.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a system token, or provider errors.
    #[instrument(skip(self))]
    pub async fn list_api_keys(&self, user_id: RelayUserId) -> Result<Vec<ApiKey>, RelayError> {
        let token = self.system_token()?;
        let url = format!("{}/get/apikeys", self.inner.config.admin_base_url);

        let response = self
            .inner
            .client
            .get(&url)
            .query(&[
                ("token", token.expose_secret()),
                ("user", &user_id.to_string()),
                ("limit", "100"),
            ])
            .send()
            .await?;

        let envelope: ApiEnvelope<Vec<ApiKey>> = Self::parse_envelope(response).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Delete a single API key by id.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` without a system token, or provider errors.
    #[instrument(skip(self))]
    pub async fn delete_api_key(&self, key_id: ApiKeyId) -> Result<(), RelayError> {
        let token = self.system_token()?;
        let url = format!("{}/delete/apikey", self.inner.config.admin_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[("token", token.expose_secret()), ("id", &key_id.to_string())])
            .send()
            .await?;

        Self::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Delete every API key belonging to an account, in parallel.
    ///
    /// Individual failures are logged and skipped; the count reflects
    /// keys that were actually deleted.
    ///
    /// # Errors
    ///
    /// Returns an error only if the key listing itself fails.
    #[instrument(skip(self))]
    pub async fn delete_all_api_keys(&self, user_id: RelayUserId) -> Result<usize, RelayError> {
        let keys = self.list_api_keys(user_id).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let deletions = keys.iter().map(|key| {
            let client = self.clone();
            let key_id = key.id;
            async move {
                match client.delete_api_key(key_id).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(key_id = %key_id, error = %e, "Failed to delete API key");
                        false
                    }
                }
            }
        });

        let deleted = join_all(deletions).await.into_iter().filter(|ok| *ok).count();
        Ok(deleted)
    }

    // ===== Messaging API (secret-authenticated) =====

    /// Fetch remaining credits for an account.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    pub async fn get_credits(&self, secret: &SecretString) -> Result<serde_json::Value, RelayError> {
        let envelope = self.api_with_secret("/get/credits", secret).await?;
        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    }

    /// Fetch the active subscription for an account.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    pub async fn get_subscription(
        &self,
        secret: &SecretString,
    ) -> Result<serde_json::Value, RelayError> {
        let envelope = self.api_with_secret("/get/subscription", secret).await?;
        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    }

    /// List registered SMS devices for an account.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    pub async fn get_devices(&self, secret: &SecretString) -> Result<serde_json::Value, RelayError> {
        let envelope = self.api_with_secret("/get/devices", secret).await?;
        Ok(envelope
            .data
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())))
    }

    /// List linked WhatsApp accounts.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    pub async fn get_wa_accounts(
        &self,
        secret: &SecretString,
    ) -> Result<serde_json::Value, RelayError> {
        let envelope = self.api_with_secret("/get/wa.accounts", secret).await?;
        Ok(envelope
            .data
            .unwrap_or_else(|| serde_json::Value::Array(Vec::new())))
    }

    /// List contact groups for an account.
    ///
    /// # Errors
    ///
    /// Returns provider errors. A 403 means the key lacks the
    /// `get_groups` permission.
    pub async fn get_groups(
        &self,
        secret: &SecretString,
    ) -> Result<Vec<super::types::ContactGroup>, RelayError> {
        let envelope = self.api_with_secret("/get/groups", secret).await?;
        Ok(envelope.data.unwrap_or_default())
    }

    /// Create a contact group.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    #[instrument(skip(self, secret))]
    pub async fn create_group(&self, secret: &SecretString, name: &str) -> Result<(), RelayError> {
        let url = format!("{}/create/group", self.inner.config.api_base_url);

        let response = self
            .inner
            .client
            .post(&url)
            .form(&[("secret", secret.expose_secret()), ("name", name)])
            .send()
            .await?;

        Self::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Create or update a contact, keyed by phone number on the provider
    /// side, optionally assigning it to groups.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    #[instrument(skip(self, secret, name))]
    pub async fn create_contact(
        &self,
        secret: &SecretString,
        name: &str,
        phone: &str,
        groups: Option<&str>,
    ) -> Result<(), RelayError> {
        let url = format!("{}/create/contact", self.inner.config.api_base_url);

        let mut form: Vec<(&str, &str)> = vec![
            ("secret", secret.expose_secret()),
            ("name", name),
            ("phone", phone),
        ];
        if let Some(groups) = groups {
            form.push(("groups", groups));
        }

        let response = self.inner.client.post(&url).form(&form).send().await?;
        Self::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Send a single SMS.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    #[instrument(skip(self, secret, sms), fields(phone = %sms.phone))]
    pub async fn send_sms(
        &self,
        secret: &SecretString,
        sms: &super::types::SmsMessage,
    ) -> Result<(), RelayError> {
        let url = format!("{}/send/sms", self.inner.config.api_base_url);

        let mut form: Vec<(&str, String)> = vec![
            ("secret", secret.expose_secret().to_string()),
            ("mode", sms.mode.clone()),
            ("phone", sms.phone.clone()),
            ("message", sms.message.clone()),
        ];
        if let Some(device) = &sms.device {
            form.push(("device", device.clone()));
        }
        if let Some(gateway) = &sms.gateway {
            form.push(("gateway", gateway.clone()));
        }
        if let Some(sim) = sms.sim {
            form.push(("sim", sim.to_string()));
        }
        if let Some(priority) = sms.priority {
            form.push(("priority", priority.to_string()));
        }
        if let Some(shortener) = sms.shortener {
            form.push(("shortener", shortener.to_string()));
        }

        let response = self.inner.client.post(&url).form(&form).send().await?;
        Self::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Send a single WhatsApp message.
    ///
    /// # Errors
    ///
    /// Returns provider errors.
    #[instrument(skip(self, secret, message), fields(recipient = %message.recipient))]
    pub async fn send_whatsapp(
        &self,
        secret: &SecretString,
        message: &super::types::WhatsappMessage,
    ) -> Result<(), RelayError> {
        let url = format!("{}/send/whatsapp", self.inner.config.api_base_url);

        let mut form: Vec<(&str, String)> = vec![
            ("secret", secret.expose_secret().to_string()),
            ("account", message.account.clone()),
            ("recipient", message.recipient.clone()),
            ("type", message.message_type.clone()),
            ("message", message.message.clone()),
        ];
        if let Some(priority) = message.priority {
            form.push(("priority", priority.to_string()));
        }

        let response = self.inner.client.post(&url).form(&form).send().await?;
        Self::parse_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("admin_base_url", &self.inner.config.admin_base_url)
            .field("api_base_url", &self.inner.config.api_base_url)
            .finish_non_exhaustive()
    }
}
