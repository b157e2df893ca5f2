//! Account linking flow.
//!
//! Links a shop to a provider account in two steps:
//!
//! 1. **Initialize**: resolve the email against the provider. An existing
//!    account gets a verification code; an unknown email gets a fresh
//!    account with a generated password (credentials emailed), then a
//!    code. When the existence check cannot run, the email is assumed new
//!    and creation is attempted anyway; the provider's duplicate
//!    rejection catches the guess being wrong.
//! 2. **Verify**: the merchant enters the code, which binds the resolved
//!    identity to the shop domain.
//!
//! Accounts that can be password-verified but never resolved to a
//! provider id are linked with a degraded identity. Degraded linkages
//! can receive codes and stay connected, but operations that need a real
//! id (API keys, SSO, subscriptions) are refused with a pointer to the
//! provider dashboard.

mod error;

pub use error::LinkingError;

use std::sync::Arc;
use std::time::Duration;

use relaylink_core::{Email, ResolvedIdentity};
use secrecy::SecretString;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use crate::db::SettingsRepository;
use crate::relay::{ApiKey, NewAccount, RelayClient, RelayError, UserLookup};
use crate::services::email::EmailService;
use crate::services::verification::{VerificationStore, generate_password};

/// Length of generated passwords for new provider accounts.
const GENERATED_PASSWORD_LENGTH: usize = 20;

/// Grace period after public registration before re-resolving the id;
/// the provider creates the account asynchronously.
const REGISTRATION_SETTLE: Duration = Duration::from_secs(1);

/// Outcome of the initialize step.
pub struct InitializeOutcome {
    /// Whether a new provider account was created for this email.
    pub is_new_user: bool,
    /// Whether the verification code email was delivered.
    pub code_email_sent: bool,
    /// The identity the verification code is bound to.
    pub identity: ResolvedIdentity,
    /// The server-generated password, only when an account was created.
    pub generated_password: Option<SecretString>,
}

impl std::fmt::Debug for InitializeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializeOutcome")
            .field("is_new_user", &self.is_new_user)
            .field("code_email_sent", &self.code_email_sent)
            .field("identity", &self.identity)
            .field(
                "generated_password",
                &self.generated_password.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Orchestrates the linking flow against the provider, the code store
/// and settings persistence.
#[derive(Clone)]
pub struct LinkingService {
    relay: RelayClient,
    email: EmailService,
    store: Arc<VerificationStore>,
    pool: PgPool,
}

impl LinkingService {
    #[must_use]
    pub fn new(
        relay: RelayClient,
        email: EmailService,
        store: Arc<VerificationStore>,
        pool: PgPool,
    ) -> Self {
        Self {
            relay,
            email,
            store,
            pool,
        }
    }

    /// Start the linking flow for a shop: resolve or create the provider
    /// account and send a verification code.
    ///
    /// # Errors
    ///
    /// Returns `LinkingError` if the provider rejects every creation
    /// path. Email delivery failures are not fatal; the outcome reports
    /// whether the code email went out.
    #[instrument(skip(self, name), fields(shop = %shop_domain))]
    pub async fn initialize(
        &self,
        shop_domain: &str,
        email: &Email,
        name: &str,
    ) -> Result<InitializeOutcome, LinkingError> {
        let lookup = self.relay.find_user_by_email(email).await?;

        if let Some(user) = lookup.found() {
            let identity = ResolvedIdentity::from_lookup(user.user_id());
            info!(user_id = user.id, "Existing provider account found");
            let code_email_sent = self.issue_and_send_code(email, name, identity).await;
            return Ok(InitializeOutcome {
                is_new_user: false,
                code_email_sent,
                identity,
                generated_password: None,
            });
        }

        // Unknown (or unknowable) email: create an account with a
        // generated password. Public self-registration needs no
        // privileged token, so it goes first; the admin endpoint is the
        // fallback and doubles as the duplicate detector.
        let password = generate_password(GENERATED_PASSWORD_LENGTH);
        let account = NewAccount {
            name: name.to_string(),
            email: email.to_string(),
            password,
        };

        let (identity, is_new_user) = match self.register_via_public_form(&account, email).await {
            Ok(identity) => (identity, true),
            Err(e) => {
                info!(error = %e, "Public registration unavailable; trying privileged creation");
                match self
                    .relay
                    .create_user_privileged(&account.name, email, &account.password)
                    .await
                {
                    Ok(user) => (ResolvedIdentity::from_lookup(user.user_id()), true),
                    Err(RelayError::AlreadyExists(_)) => {
                        // The existence check was wrong or indeterminate.
                        // The account is real; bind to it, degraded if
                        // the id still cannot be resolved.
                        info!("Provider reports account exists; re-resolving id");
                        let identity = match self.relay.find_user_by_email(email).await? {
                            UserLookup::Found(user) => {
                                ResolvedIdentity::from_lookup(user.user_id())
                            }
                            UserLookup::NotFound | UserLookup::Indeterminate => {
                                ResolvedIdentity::Degraded
                            }
                        };
                        (identity, false)
                    }
                    Err(e) => {
                        return Err(LinkingError::AccountCreation(e.to_string()));
                    }
                }
            }
        };

        let generated_password = if is_new_user {
            if let Err(e) = self
                .email
                .send_new_account(email, name, &account.password)
                .await
            {
                warn!(error = %e, "Failed to send new account credentials email");
            }
            Some(SecretString::from(account.password))
        } else {
            None
        };

        let code_email_sent = self.issue_and_send_code(email, name, identity).await;

        Ok(InitializeOutcome {
            is_new_user,
            code_email_sent,
            identity,
            generated_password,
        })
    }

    /// Verify the emailed code and persist the linkage for the shop.
    ///
    /// # Errors
    ///
    /// Returns `Verification` errors for a missing, expired or wrong
    /// code, or `Repository` errors if persistence fails.
    #[instrument(skip(self, code), fields(shop = %shop_domain))]
    pub async fn verify(
        &self,
        shop_domain: &str,
        email: &Email,
        code: &str,
    ) -> Result<ResolvedIdentity, LinkingError> {
        let identity = self.store.consume(email, code)?;

        SettingsRepository::new(&self.pool)
            .upsert_linked_account(shop_domain, email, identity)
            .await?;

        info!(degraded = identity.is_degraded(), "Shop linked to provider account");
        Ok(identity)
    }

    /// Issue and store a provider API key for a linked shop, scoped to
    /// the channels the merchant enabled. Refuses to stack keys; the
    /// existing one must be revoked first.
    ///
    /// # Errors
    ///
    /// Returns `NotLinked` before verification completes,
    /// `KeyAlreadyConnected` when a key is stored, `DegradedIdentity`
    /// when no concrete id is available, and provider or persistence
    /// errors otherwise.
    #[instrument(skip(self, name), fields(shop = %shop_domain))]
    pub async fn issue_api_key(
        &self,
        shop_domain: &str,
        name: Option<&str>,
        sms_enabled: bool,
        whatsapp_enabled: bool,
    ) -> Result<ApiKey, LinkingError> {
        let repo = SettingsRepository::new(&self.pool);
        let settings = repo.get(shop_domain).await?.ok_or(LinkingError::NotLinked)?;
        let identity = settings.linked_identity().ok_or(LinkingError::NotLinked)?;
        if settings.has_api_key() {
            return Err(LinkingError::KeyAlreadyConnected);
        }
        let user_id = identity.real_id().ok_or(LinkingError::DegradedIdentity)?;

        let default_name = format!("Shopify ({shop_domain})");
        let key = self
            .relay
            .create_api_key(
                user_id,
                name.unwrap_or(&default_name),
                sms_enabled,
                whatsapp_enabled,
            )
            .await?;

        let secret = key.secret.clone().ok_or_else(|| {
            LinkingError::Relay(RelayError::Parse(
                "Key creation returned no secret".to_string(),
            ))
        })?;

        repo.save_api_key(shop_domain, Some(key.id), &SecretString::from(secret))
            .await?;

        info!(key_id = %key.id, "API key issued and stored");
        Ok(key)
    }

    /// Create an SSO link into the provider dashboard for a linked shop.
    ///
    /// # Errors
    ///
    /// Returns `NotLinked`, `DegradedIdentity`, or provider errors.
    #[instrument(skip(self), fields(shop = %shop_domain))]
    pub async fn sso_link(
        &self,
        shop_domain: &str,
        redirect: &str,
    ) -> Result<String, LinkingError> {
        let settings = SettingsRepository::new(&self.pool)
            .get(shop_domain)
            .await?
            .ok_or(LinkingError::NotLinked)?;
        let identity = settings.linked_identity().ok_or(LinkingError::NotLinked)?;
        let user_id = identity.real_id().ok_or(LinkingError::DegradedIdentity)?;

        Ok(self.relay.create_sso_link(user_id, redirect).await?)
    }

    /// Disconnect a shop: revoke provider API keys best-effort, then
    /// clear the linkage columns. Notification and sender preferences
    /// survive for a later relink. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Repository` errors only; revocation failures are logged
    /// and skipped so cleanup always completes.
    #[instrument(skip(self), fields(shop = %shop_domain))]
    pub async fn disconnect(&self, shop_domain: &str) -> Result<(), LinkingError> {
        let repo = SettingsRepository::new(&self.pool);
        self.revoke_keys_best_effort(&repo, shop_domain).await?;

        repo.clear_linkage(shop_domain).await?;
        info!("Shop disconnected");
        Ok(())
    }

    /// Remove every trace of a shop: revoke keys best-effort, then
    /// delete the settings row. Used on uninstall and GDPR redaction.
    ///
    /// # Errors
    ///
    /// Returns `Repository` errors only.
    #[instrument(skip(self), fields(shop = %shop_domain))]
    pub async fn purge(&self, shop_domain: &str) -> Result<(), LinkingError> {
        let repo = SettingsRepository::new(&self.pool);
        self.revoke_keys_best_effort(&repo, shop_domain).await?;

        repo.delete(shop_domain).await?;
        info!("Shop data deleted");
        Ok(())
    }

    async fn revoke_keys_best_effort(
        &self,
        repo: &SettingsRepository<'_>,
        shop_domain: &str,
    ) -> Result<(), LinkingError> {
        if let Some(settings) = repo.get(shop_domain).await?
            && let Some(user_id) = settings.linked_identity().and_then(|i| i.real_id())
        {
            match self.relay.delete_all_api_keys(user_id).await {
                Ok(deleted) => info!(deleted, "Revoked provider API keys"),
                Err(e) => warn!(error = %e, "Failed to revoke provider API keys"),
            }
        }
        Ok(())
    }

    /// Create the account via the public signup form and re-resolve the
    /// new id through the admin listing.
    ///
    /// The signup form answers 200 whether or not it actually created the
    /// account, so when the listing cannot surface the new id the login
    /// probe must confirm the credentials before a degraded identity is
    /// bound. An unconfirmable registration is an error, which sends the
    /// caller down the privileged fallback.
    async fn register_via_public_form(
        &self,
        account: &NewAccount,
        email: &Email,
    ) -> Result<ResolvedIdentity, LinkingError> {
        self.relay
            .register_public(account)
            .await
            .map_err(|e| LinkingError::AccountCreation(e.to_string()))?;

        tokio::time::sleep(REGISTRATION_SETTLE).await;

        match self.relay.find_user_by_email(email).await? {
            UserLookup::Found(user) => Ok(ResolvedIdentity::from_lookup(user.user_id())),
            UserLookup::NotFound | UserLookup::Indeterminate => {
                if self.relay.verify_password(email, &account.password).await {
                    info!("Registered account confirmed by login; id unresolved");
                    Ok(ResolvedIdentity::Degraded)
                } else {
                    Err(LinkingError::AccountCreation(
                        "registration was accepted but the account could not be confirmed"
                            .to_string(),
                    ))
                }
            }
        }
    }

    /// Issue a code and email it; delivery failure only clears the flag.
    async fn issue_and_send_code(
        &self,
        email: &Email,
        name: &str,
        identity: ResolvedIdentity,
    ) -> bool {
        let code = self.store.issue(email, identity);
        match self.email.send_verification_code(email, name, &code).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send verification code email");
                false
            }
        }
    }
}
