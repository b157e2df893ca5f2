//! HTTP client for the relay messaging provider.
//!
//! The provider exposes three surfaces, each with its own authentication:
//!
//! - **Admin API** (`{admin}/get/...`, `{admin}/create/...`): privileged
//!   operations authenticated by a system token. User listing, account
//!   creation, API key and subscription management.
//! - **Messaging API** (`{api}/send/...`, `{api}/get/...`): per-account
//!   operations authenticated by an API key secret.
//! - **Web surface** (`{web}/auth/...`, `{web}/plugin`): the public site.
//!   Registration, login (used as a password oracle) and the SSO plugin.
//!
//! All endpoints accept form-encoded bodies and answer with a JSON
//! envelope; see [`types::ApiEnvelope`].

mod auth;
mod client;
mod error;
mod sso;
mod types;

pub use client::RelayClient;
pub use error::RelayError;
pub use types::{
    API_KEY_BASE_PERMISSIONS, API_KEY_SMS_PERMISSIONS, API_KEY_WA_PERMISSIONS, ApiEnvelope, ApiKey,
    ContactGroup, NewAccount, Package, RelayUser,
    SmsMessage, UserLookup, WhatsappMessage,
};
