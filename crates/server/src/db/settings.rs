//! Shop settings repository.
//!
//! One row per shop domain holding the provider linkage (account email
//! plus resolved id), the issued API key, a cached plan, and the
//! merchant's notification preferences. A row with an email but a NULL
//! `relay_user_id` is a degraded linkage: the account was verified by
//! password but never resolved to a concrete provider id.

use chrono::{DateTime, Utc};
use relaylink_core::{ApiKeyId, Email, PlanId, ResolvedIdentity};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use super::RepositoryError;

/// Delivery channel preference for order notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    #[default]
    Sms,
    Whatsapp,
    /// Prefer SMS when a device is configured, else fall back to WhatsApp.
    Automatic,
}

impl NotificationChannel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
            Self::Automatic => "automatic",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "whatsapp" => Self::Whatsapp,
            "automatic" => Self::Automatic,
            _ => Self::Sms,
        }
    }
}

/// Per-shop settings and provider linkage.
#[derive(Clone)]
pub struct ShopSettings {
    pub shop_domain: String,
    pub account_email: Option<Email>,
    /// NULL in the database when the linkage is degraded.
    pub relay_user_id: Option<i64>,
    pub api_key_id: Option<ApiKeyId>,
    pub api_secret: Option<SecretString>,
    pub package_id: Option<PlanId>,
    pub plan_name: Option<String>,
    pub notification_channel: NotificationChannel,
    pub notify_order_created: bool,
    pub notify_order_shipped: bool,
    pub notify_order_cancelled: bool,
    pub order_created_template: Option<String>,
    pub order_shipped_template: Option<String>,
    pub order_cancelled_template: Option<String>,
    pub sms_enabled: bool,
    pub default_sms_mode: Option<String>,
    pub default_sms_device_id: Option<String>,
    pub default_sms_sim: Option<i16>,
    pub whatsapp_enabled: bool,
    pub default_wa_account: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShopSettings {
    /// The provider identity this shop is linked to, if any.
    #[must_use]
    pub fn linked_identity(&self) -> Option<ResolvedIdentity> {
        self.account_email
            .as_ref()
            .map(|_| ResolvedIdentity::from_column(self.relay_user_id))
    }

    /// Whether an API key has been issued and stored for this shop.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.api_secret.is_some()
    }
}

impl std::fmt::Debug for ShopSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopSettings")
            .field("shop_domain", &self.shop_domain)
            .field("account_email", &self.account_email)
            .field("relay_user_id", &self.relay_user_id)
            .field("api_key_id", &self.api_key_id)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field("notification_channel", &self.notification_channel)
            .finish_non_exhaustive()
    }
}

/// Notification preferences, saved as one unit.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default)]
    pub channel: NotificationChannel,
    #[serde(default = "default_true")]
    pub notify_order_created: bool,
    #[serde(default = "default_true")]
    pub notify_order_shipped: bool,
    /// Off by default; cancellations are usually contact bookkeeping only.
    #[serde(default)]
    pub notify_order_cancelled: bool,
    pub order_created_template: Option<String>,
    pub order_shipped_template: Option<String>,
    pub order_cancelled_template: Option<String>,
}

/// Sender configuration, saved as one unit.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderSettings {
    #[serde(default)]
    pub sms_enabled: bool,
    pub default_sms_mode: Option<String>,
    pub default_sms_device_id: Option<String>,
    pub default_sms_sim: Option<i16>,
    #[serde(default)]
    pub whatsapp_enabled: bool,
    pub default_wa_account: Option<String>,
}

const fn default_true() -> bool {
    true
}

// =============================================================================
// Internal Row Type
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ShopSettingsRow {
    shop_domain: String,
    account_email: Option<String>,
    relay_user_id: Option<i64>,
    api_key_id: Option<ApiKeyId>,
    api_secret: Option<String>,
    package_id: Option<PlanId>,
    plan_name: Option<String>,
    notification_channel: String,
    notify_order_created: bool,
    notify_order_shipped: bool,
    notify_order_cancelled: bool,
    order_created_template: Option<String>,
    order_shipped_template: Option<String>,
    order_cancelled_template: Option<String>,
    sms_enabled: bool,
    default_sms_mode: Option<String>,
    default_sms_device_id: Option<String>,
    default_sms_sim: Option<i16>,
    whatsapp_enabled: bool,
    default_wa_account: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShopSettingsRow> for ShopSettings {
    type Error = RepositoryError;

    fn try_from(row: ShopSettingsRow) -> Result<Self, Self::Error> {
        let account_email = row
            .account_email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;

        Ok(Self {
            shop_domain: row.shop_domain,
            account_email,
            relay_user_id: row.relay_user_id,
            api_key_id: row.api_key_id,
            api_secret: row.api_secret.map(SecretString::from),
            package_id: row.package_id,
            plan_name: row.plan_name,
            notification_channel: NotificationChannel::parse(&row.notification_channel),
            notify_order_created: row.notify_order_created,
            notify_order_shipped: row.notify_order_shipped,
            notify_order_cancelled: row.notify_order_cancelled,
            order_created_template: row.order_created_template,
            order_shipped_template: row.order_shipped_template,
            order_cancelled_template: row.order_cancelled_template,
            sms_enabled: row.sms_enabled,
            default_sms_mode: row.default_sms_mode,
            default_sms_device_id: row.default_sms_device_id,
            default_sms_sim: row.default_sms_sim,
            whatsapp_enabled: row.whatsapp_enabled,
            default_wa_account: row.default_wa_account,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = r"
    shop_domain, account_email, relay_user_id, api_key_id, api_secret,
    package_id, plan_name, notification_channel,
    notify_order_created, notify_order_shipped, notify_order_cancelled,
    order_created_template, order_shipped_template, order_cancelled_template,
    sms_enabled, default_sms_mode, default_sms_device_id, default_sms_sim,
    whatsapp_enabled, default_wa_account,
    created_at, updated_at
";

// =============================================================================
// Repository
// =============================================================================

/// Repository for shop settings database operations.
pub struct SettingsRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SettingsRepository<'a> {
    /// Create a new settings repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Fetch settings for a shop, if a row exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the data is invalid.
    pub async fn get(&self, shop_domain: &str) -> Result<Option<ShopSettings>, RepositoryError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM shop_settings WHERE shop_domain = $1");
        let row: Option<ShopSettingsRow> = sqlx::query_as(&query)
            .bind(shop_domain)
            .fetch_optional(self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    /// Record the provider linkage for a shop, creating the row if needed.
    ///
    /// A degraded identity is stored as a NULL user id alongside the email.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert_linked_account(
        &self,
        shop_domain: &str,
        email: &Email,
        identity: ResolvedIdentity,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO shop_settings (shop_domain, account_email, relay_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (shop_domain) DO UPDATE
            SET account_email = EXCLUDED.account_email,
                relay_user_id = EXCLUDED.relay_user_id,
                updated_at = NOW()
            ",
        )
        .bind(shop_domain)
        .bind(email.as_str())
        .bind(identity.as_column())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Store an issued API key for a shop.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the shop has no settings row.
    pub async fn save_api_key(
        &self,
        shop_domain: &str,
        api_key_id: Option<ApiKeyId>,
        api_secret: &SecretString,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop_settings
            SET api_key_id = $2, api_secret = $3, updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .bind(api_key_id)
        .bind(api_secret.expose_secret())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Clear the provider linkage for a shop while keeping notification
    /// and sender preferences: a merchant-initiated disconnect with
    /// intent to relink. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn clear_linkage(&self, shop_domain: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE shop_settings
            SET account_email = NULL,
                relay_user_id = NULL,
                api_key_id = NULL,
                api_secret = NULL,
                package_id = NULL,
                plan_name = NULL,
                updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Remove the stored API key for a shop.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn clear_api_key(&self, shop_domain: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE shop_settings
            SET api_key_id = NULL, api_secret = NULL, updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Cache the shop's active provider plan.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the shop has no settings row.
    pub async fn save_plan(
        &self,
        shop_domain: &str,
        package_id: PlanId,
        plan_name: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop_settings
            SET package_id = $2, plan_name = $3, updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .bind(package_id)
        .bind(plan_name)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Save notification preferences.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the shop has no settings row.
    pub async fn save_notification_settings(
        &self,
        shop_domain: &str,
        settings: &NotificationSettings,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop_settings
            SET notification_channel = $2,
                notify_order_created = $3,
                notify_order_shipped = $4,
                notify_order_cancelled = $5,
                order_created_template = $6,
                order_shipped_template = $7,
                order_cancelled_template = $8,
                updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .bind(settings.channel.as_str())
        .bind(settings.notify_order_created)
        .bind(settings.notify_order_shipped)
        .bind(settings.notify_order_cancelled)
        .bind(settings.order_created_template.as_deref())
        .bind(settings.order_shipped_template.as_deref())
        .bind(settings.order_cancelled_template.as_deref())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Save sender configuration.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the shop has no settings row.
    pub async fn save_sender_settings(
        &self,
        shop_domain: &str,
        settings: &SenderSettings,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shop_settings
            SET sms_enabled = $2,
                default_sms_mode = $3,
                default_sms_device_id = $4,
                default_sms_sim = $5,
                whatsapp_enabled = $6,
                default_wa_account = $7,
                updated_at = NOW()
            WHERE shop_domain = $1
            ",
        )
        .bind(shop_domain)
        .bind(settings.sms_enabled)
        .bind(settings.default_sms_mode.as_deref())
        .bind(settings.default_sms_device_id.as_deref())
        .bind(settings.default_sms_sim)
        .bind(settings.whatsapp_enabled)
        .bind(settings.default_wa_account.as_deref())
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Delete all settings for a shop. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn delete(&self, shop_domain: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM shop_settings WHERE shop_domain = $1")
            .bind(shop_domain)
            .execute(self.pool)
            .await?;

        Ok(())
    }
}
