//! Linking API: connect a shop to a provider account and manage the
//! resulting linkage.
//!
//! Every endpoint identifies the calling shop by the `X-Shop-Domain`
//! header, set by the embedded app's backend proxy.

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::request::Parts,
    routing::{get, post, put},
};
use relaylink_core::{ApiKeyId, Email, PlanId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::db::{NotificationSettings, SenderSettings, SettingsRepository, ShopSettings};
use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the shop's myshopify domain.
const SHOP_DOMAIN_HEADER: &str = "x-shop-domain";

/// Build the linking API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/initialize", post(initialize))
        .route("/verify", post(verify))
        .route("/status", get(status))
        .route("/api-key", post(issue_api_key).put(store_manual_api_key).delete(revoke_api_key))
        .route("/plans", get(list_plans))
        .route("/plan", post(assign_plan))
        .route("/sso", post(sso))
        .route("/password-reset", post(password_reset))
        .route("/settings/notifications", put(save_notifications))
        .route("/settings/sender", put(save_sender))
        .route("/sender-options", get(sender_options))
        .route("/disconnect", post(disconnect))
}

// =============================================================================
// Extractors
// =============================================================================

/// The calling shop's domain, taken from `X-Shop-Domain`.
#[derive(Debug, Clone)]
pub struct ShopDomain(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ShopDomain {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let domain = parts
            .headers
            .get(SHOP_DOMAIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && v.len() <= 255 && !v.contains(char::is_whitespace))
            .ok_or_else(|| AppError::BadRequest("missing or invalid shop domain".to_string()))?;

        Ok(Self(domain.to_ascii_lowercase()))
    }
}

fn parse_email(raw: &str) -> Result<Email, AppError> {
    Email::parse(raw).map_err(|e| AppError::BadRequest(format!("invalid email: {e}")))
}

// =============================================================================
// Initialize / Verify
// =============================================================================

#[derive(Debug, Deserialize)]
struct InitializeRequest {
    email: String,
    #[serde(default)]
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResponse {
    is_new_user: bool,
    code_issued: bool,
    code_email_sent: bool,
    degraded: bool,
    /// Only present when an account was created; shown once so the
    /// merchant can log in even if the credentials email bounced.
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_password: Option<String>,
}

/// POST /api/link/initialize
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn initialize(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<InitializeRequest>,
) -> Result<Json<InitializeResponse>, AppError> {
    let email = parse_email(&body.email)?;

    let outcome = state.linking().initialize(&shop.0, &email, &body.name).await?;

    Ok(Json(InitializeResponse {
        is_new_user: outcome.is_new_user,
        code_issued: true,
        code_email_sent: outcome.code_email_sent,
        degraded: outcome.identity.is_degraded(),
        generated_password: outcome
            .generated_password
            .map(|p| p.expose_secret().to_string()),
    }))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    email: String,
    code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    linked: bool,
    degraded: bool,
    /// The resolved provider id; null for degraded linkages.
    user_id: Option<i64>,
}

/// POST /api/link/verify
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn verify(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let email = parse_email(&body.email)?;

    let identity = state.linking().verify(&shop.0, &email, &body.code).await?;

    Ok(Json(VerifyResponse {
        linked: true,
        degraded: identity.is_degraded(),
        user_id: identity.as_column(),
    }))
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    connected: bool,
    degraded: bool,
    account_email: Option<String>,
    has_api_key: bool,
    plan_name: Option<String>,
    package_id: Option<PlanId>,
    credits: Option<serde_json::Value>,
    subscription: Option<serde_json::Value>,
}

/// GET /api/link/status
///
/// Live provider data is fetched with the stored API key when one
/// exists; an active subscription reported by the provider is synced
/// back into the cached plan columns.
#[instrument(skip(state), fields(shop = %shop.0))]
async fn status(
    State(state): State<AppState>,
    shop: ShopDomain,
) -> Result<Json<StatusResponse>, AppError> {
    let repo = SettingsRepository::new(state.pool());
    let Some(settings) = repo.get(&shop.0).await? else {
        return Ok(Json(StatusResponse {
            connected: false,
            degraded: false,
            account_email: None,
            has_api_key: false,
            plan_name: None,
            package_id: None,
            credits: None,
            subscription: None,
        }));
    };

    let (credits, subscription) = match &settings.api_secret {
        Some(secret) => {
            let (credits, subscription) = tokio::join!(
                state.relay().get_credits(secret),
                state.relay().get_subscription(secret),
            );
            (flatten_provider_result(credits), flatten_provider_result(subscription))
        }
        None => (None, None),
    };

    let (plan_name, package_id) = sync_plan(&repo, &shop.0, &settings, subscription.as_ref()).await;

    Ok(Json(StatusResponse {
        connected: settings.linked_identity().is_some(),
        degraded: settings
            .linked_identity()
            .is_some_and(|i| i.is_degraded()),
        account_email: settings.account_email.as_ref().map(ToString::to_string),
        has_api_key: settings.has_api_key(),
        plan_name,
        package_id,
        credits,
        subscription,
    }))
}

/// Status must render even when the provider is down; failures become
/// absent fields.
fn flatten_provider_result(
    result: Result<serde_json::Value, crate::relay::RelayError>,
) -> Option<serde_json::Value> {
    match result {
        Ok(serde_json::Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Provider data fetch failed for status");
            None
        }
    }
}

/// Sync a provider-reported subscription into the cached plan columns,
/// returning the effective plan after the sync.
async fn sync_plan(
    repo: &SettingsRepository<'_>,
    shop_domain: &str,
    settings: &ShopSettings,
    subscription: Option<&serde_json::Value>,
) -> (Option<String>, Option<PlanId>) {
    let live = subscription.and_then(|s| {
        let package = s.get("package").and_then(serde_json::Value::as_i64)?;
        let name = s.get("name").and_then(serde_json::Value::as_str)?;
        Some((PlanId::new(package), name.to_string()))
    });

    if let Some((package_id, plan_name)) = live {
        let changed = settings.package_id != Some(package_id)
            || settings.plan_name.as_deref() != Some(plan_name.as_str());
        if changed
            && let Err(e) = repo.save_plan(shop_domain, package_id, &plan_name).await
        {
            warn!(error = %e, "Failed to sync plan from provider subscription");
        }
        return (Some(plan_name), Some(package_id));
    }

    (settings.plan_name.clone(), settings.package_id)
}

// =============================================================================
// API keys
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    /// Absent for manually pasted keys; the provider id is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    key_id: Option<ApiKeyId>,
    stored: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct IssueApiKeyRequest {
    name: Option<String>,
    #[serde(default = "default_true")]
    sms_enabled: bool,
    #[serde(default = "default_true")]
    whatsapp_enabled: bool,
}

const fn default_true() -> bool {
    true
}

/// POST /api/link/api-key
///
/// Issues a key scoped to the enabled channels. Conflicts when a key is
/// already stored; revoke first.
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn issue_api_key(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<IssueApiKeyRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    let key = state
        .linking()
        .issue_api_key(
            &shop.0,
            body.name.as_deref(),
            body.sms_enabled,
            body.whatsapp_enabled,
        )
        .await?;
    Ok(Json(ApiKeyResponse {
        key_id: Some(key.id),
        stored: true,
    }))
}

/// DELETE /api/link/api-key
///
/// Revokes every provider key for the linked account (best-effort) and
/// clears the stored one.
#[instrument(skip(state), fields(shop = %shop.0))]
async fn revoke_api_key(
    State(state): State<AppState>,
    shop: ShopDomain,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = SettingsRepository::new(state.pool());
    let settings = repo
        .get(&shop.0)
        .await?
        .ok_or_else(|| AppError::NotFound("shop settings".to_string()))?;

    let mut revoked = 0;
    if let Some(user_id) = settings.linked_identity().and_then(|i| i.real_id()) {
        match state.relay().delete_all_api_keys(user_id).await {
            Ok(count) => revoked = count,
            Err(e) => warn!(error = %e, "Failed to revoke provider API keys"),
        }
    }

    repo.clear_api_key(&shop.0).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

/// Allow merchants on degraded linkages to paste a manually created key.
#[derive(Debug, Deserialize)]
struct ManualApiKeyRequest {
    secret: String,
}

/// PUT /api/link/api-key
///
/// Degraded linkages cannot have keys issued for them; the merchant
/// creates one in the provider dashboard and pastes it here.
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn store_manual_api_key(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<ManualApiKeyRequest>,
) -> Result<Json<ApiKeyResponse>, AppError> {
    if body.secret.trim().is_empty() {
        return Err(AppError::BadRequest("secret must not be empty".to_string()));
    }

    SettingsRepository::new(state.pool())
        .save_api_key(&shop.0, None, &SecretString::from(body.secret))
        .await?;

    Ok(Json(ApiKeyResponse { key_id: None, stored: true }))
}

// =============================================================================
// Plans
// =============================================================================

/// GET /api/link/plans
#[instrument(skip(state), fields(shop = %shop.0))]
async fn list_plans(
    State(state): State<AppState>,
    shop: ShopDomain,
) -> Result<Json<Vec<crate::relay::Package>>, AppError> {
    let packages = state.relay().list_packages().await?;
    Ok(Json(packages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignPlanRequest {
    plan_id: PlanId,
    #[serde(default)]
    plan_name: Option<String>,
    #[serde(default = "default_duration")]
    duration_months: u32,
}

const fn default_duration() -> u32 {
    1
}

/// POST /api/link/plan
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn assign_plan(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<AssignPlanRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = SettingsRepository::new(state.pool());
    let settings = repo
        .get(&shop.0)
        .await?
        .ok_or(AppError::Linking(crate::services::LinkingError::NotLinked))?;
    let user_id = settings
        .linked_identity()
        .and_then(|i| i.real_id())
        .ok_or(AppError::Linking(
            crate::services::LinkingError::DegradedIdentity,
        ))?;

    let result = state
        .relay()
        .create_subscription(user_id, body.plan_id, body.duration_months)
        .await?;

    if let Some(name) = body.plan_name.as_deref() {
        repo.save_plan(&shop.0, body.plan_id, name).await?;
    }

    Ok(Json(result))
}

// =============================================================================
// SSO and password reset
// =============================================================================

#[derive(Debug, Deserialize)]
struct SsoRequest {
    #[serde(default = "default_redirect")]
    redirect: String,
}

fn default_redirect() -> String {
    "dashboard".to_string()
}

/// POST /api/link/sso
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn sso(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<SsoRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let url = state.linking().sso_link(&shop.0, &body.redirect).await?;
    Ok(Json(serde_json::json!({ "url": url })))
}

#[derive(Debug, Deserialize)]
struct PasswordResetRequest {
    email: String,
}

/// POST /api/link/password-reset
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn password_reset(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<PasswordResetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = parse_email(&body.email)?;
    state.relay().send_password_reset(&email).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

// =============================================================================
// Settings
// =============================================================================

/// PUT /api/link/settings/notifications
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn save_notifications(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<NotificationSettings>,
) -> Result<Json<serde_json::Value>, AppError> {
    SettingsRepository::new(state.pool())
        .save_notification_settings(&shop.0, &body)
        .await?;
    Ok(Json(serde_json::json!({ "saved": true })))
}

/// PUT /api/link/settings/sender
#[instrument(skip(state, body), fields(shop = %shop.0))]
async fn save_sender(
    State(state): State<AppState>,
    shop: ShopDomain,
    Json(body): Json<SenderSettings>,
) -> Result<Json<serde_json::Value>, AppError> {
    SettingsRepository::new(state.pool())
        .save_sender_settings(&shop.0, &body)
        .await?;
    Ok(Json(serde_json::json!({ "saved": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SenderOptionsResponse {
    devices: serde_json::Value,
    wa_accounts: serde_json::Value,
}

/// GET /api/link/sender-options
///
/// Live sender choices for the settings UI: registered SMS devices and
/// linked WhatsApp accounts. Needs a stored API key.
#[instrument(skip(state), fields(shop = %shop.0))]
async fn sender_options(
    State(state): State<AppState>,
    shop: ShopDomain,
) -> Result<Json<SenderOptionsResponse>, AppError> {
    let settings = SettingsRepository::new(state.pool())
        .get(&shop.0)
        .await?
        .ok_or_else(|| AppError::NotFound("shop settings".to_string()))?;
    let secret = settings
        .api_secret
        .ok_or_else(|| AppError::BadRequest("no API key stored for this shop".to_string()))?;

    let (devices, wa_accounts) = tokio::join!(
        state.relay().get_devices(&secret),
        state.relay().get_wa_accounts(&secret),
    );

    Ok(Json(SenderOptionsResponse {
        devices: devices?,
        wa_accounts: wa_accounts?,
    }))
}

// =============================================================================
// Disconnect
// =============================================================================

/// POST /api/link/disconnect
#[instrument(skip(state), fields(shop = %shop.0))]
async fn disconnect(
    State(state): State<AppState>,
    shop: ShopDomain,
) -> Result<Json<serde_json::Value>, AppError> {
    state.linking().disconnect(&shop.0).await?;
    Ok(Json(serde_json::json!({ "disconnected": true })))
}
