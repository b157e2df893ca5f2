//! Wire types for the relay provider API.
//!
//! The provider wraps every JSON response in an envelope:
//!
//! ```json
//! { "status": 200, "message": "OK", "data": { ... } }
//! ```
//!
//! `status` mirrors an HTTP code and must be 200 (or absent) for success.
//! `message` is usually a string but the plugin endpoint returns `false`,
//! so it is kept as a raw JSON value.

use relaylink_core::{ApiKeyId, PlanId, RelayUserId, ResolvedIdentity};
use serde::{Deserialize, Serialize};

/// Standard response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Whether the in-band status code indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_none_or(|s| s == 200)
    }

    /// The message as text, if the provider sent one.
    #[must_use]
    pub fn message_text(&self) -> Option<&str> {
        self.message.as_ref().and_then(serde_json::Value::as_str)
    }
}

/// A provider account as returned by the admin user listing.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RelayUser {
    /// Typed id, if the provider sent a usable one. Non-positive ids and
    /// the legacy placeholder id some old linkages carry are rejected.
    #[must_use]
    pub fn user_id(&self) -> Option<RelayUserId> {
        ResolvedIdentity::from_wire(self.id).real_id()
    }
}

/// Outcome of an existence check against the provider.
///
/// `Indeterminate` means the check could not run at all (no privileged
/// token, or the admin surface was unreachable). Callers must not treat
/// it as proof of absence when a destructive action hangs on the answer.
#[derive(Debug, Clone)]
pub enum UserLookup {
    Found(RelayUser),
    NotFound,
    Indeterminate,
}

impl UserLookup {
    #[must_use]
    pub const fn found(&self) -> Option<&RelayUser> {
        match self {
            Self::Found(user) => Some(user),
            Self::NotFound | Self::Indeterminate => None,
        }
    }
}

/// An API key as returned by the admin key listing.
///
/// The `secret` field is only populated on creation responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// A contact group as returned by the messaging API.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactGroup {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A subscription package offered by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: PlanId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Account details for a new provider registration.
#[derive(Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Parameters for a single SMS send.
#[derive(Debug, Clone, Default)]
pub struct SmsMessage {
    pub mode: String,
    pub phone: String,
    pub message: String,
    pub device: Option<String>,
    pub gateway: Option<String>,
    pub sim: Option<u8>,
    pub priority: Option<u8>,
    pub shortener: Option<bool>,
}

/// Parameters for a single WhatsApp send.
#[derive(Debug, Clone)]
pub struct WhatsappMessage {
    pub account: String,
    pub recipient: String,
    pub message: String,
    pub message_type: String,
    pub priority: Option<u8>,
}

impl WhatsappMessage {
    #[must_use]
    pub fn text(account: impl Into<String>, recipient: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            recipient: recipient.into(),
            message: message.into(),
            message_type: "text".to_owned(),
            priority: None,
        }
    }
}

/// Read permissions carried by every key this service issues; they
/// drive the connection status panel and sender option lists.
pub const API_KEY_BASE_PERMISSIONS: &[&str] = &[
    "get_credits",
    "get_contacts",
    "get_devices",
    "get_wa_accounts",
    "get_subscription",
];

/// Send scopes added when the merchant enables the SMS channel.
pub const API_KEY_SMS_PERMISSIONS: &[&str] = &["sms_send", "sms_send_bulk"];

/// Send scopes added when the merchant enables the WhatsApp channel.
pub const API_KEY_WA_PERMISSIONS: &[&str] = &["wa_send", "wa_send_bulk"];
