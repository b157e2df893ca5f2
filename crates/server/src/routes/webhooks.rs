//! Shopify webhook handlers.
//!
//! Every webhook body is HMAC-verified against the app secret before
//! parsing. After verification, handlers never fail the request: order
//! notifications are fire-and-forget, and Shopify retries aggressively
//! on non-2xx responses, so processing errors are logged and swallowed.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::db::{NotificationChannel, SettingsRepository, ShopSettings};
use crate::relay::{RelayClient, SmsMessage, WhatsappMessage};
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const HMAC_HEADER: &str = "x-shopify-hmac-sha256";
const SHOP_HEADER: &str = "x-shopify-shop-domain";
const TOPIC_HEADER: &str = "x-shopify-topic";

/// Contact group for customers with a placed order.
const CUSTOMERS_GROUP: &str = "Customers";

/// Contact group for customers whose order was cancelled. The provider
/// cannot remove contacts from groups, only reassign them.
const NON_CUSTOMERS_GROUP: &str = "NonCustomers";

/// Build the webhook router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/create", post(orders_create))
        .route("/orders/fulfilled", post(orders_fulfilled))
        .route("/orders/cancelled", post(orders_cancelled))
        .route("/app/uninstalled", post(app_uninstalled))
        .route("/customers/redact", post(gdpr_ack))
        .route("/customers/data_request", post(gdpr_ack))
        .route("/shop/redact", post(shop_redact))
}

// =============================================================================
// Verification
// =============================================================================

/// Verify the `X-Shopify-Hmac-Sha256` signature over the raw body.
///
/// The header carries a base64-encoded HMAC-SHA256 digest keyed by the
/// app secret. Comparison goes through `Mac::verify_slice`, which is
/// constant-time.
fn verify_webhook_hmac(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    let Some(provided) = headers.get(HMAC_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Ok(provided) = BASE64.decode(provided) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Authenticate a webhook request, returning the shop domain.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, StatusCode> {
    let secret = state.config().shopify_webhook_secret.expose_secret();
    if !verify_webhook_hmac(headers, body, secret) {
        warn!("Webhook rejected: HMAC verification failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    headers
        .get(SHOP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)
}

fn topic(headers: &HeaderMap) -> &str {
    headers
        .get(TOPIC_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

// =============================================================================
// Order Payload
// =============================================================================

#[derive(Debug, Deserialize, Default)]
struct OrderPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    order_status_url: Option<String>,
    #[serde(default)]
    customer: Option<OrderCustomer>,
    #[serde(default)]
    shipping_address: Option<OrderAddress>,
    #[serde(default)]
    billing_address: Option<OrderAddress>,
}

#[derive(Debug, Deserialize, Default)]
struct OrderCustomer {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OrderAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

impl OrderPayload {
    /// Recipient phone, in precedence order: order, shipping address,
    /// billing address, customer record.
    fn phone(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .or_else(|| self.shipping_address.as_ref().and_then(|a| a.phone.as_deref()))
            .or_else(|| self.billing_address.as_ref().and_then(|a| a.phone.as_deref()))
            .or_else(|| self.customer.as_ref().and_then(|c| c.phone.as_deref()))
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Display name for the customer, falling back through the payload.
    fn customer_name(&self) -> &str {
        self.customer
            .as_ref()
            .and_then(|c| c.first_name.as_deref())
            .or_else(|| self.shipping_address.as_ref().and_then(|a| a.name.as_deref()))
            .or_else(|| self.billing_address.as_ref().and_then(|a| a.name.as_deref()))
            .or_else(|| self.customer.as_ref().and_then(|c| c.last_name.as_deref()))
            .unwrap_or("")
    }
}

// =============================================================================
// Template Rendering
// =============================================================================

/// Substitute `{{ key }}` placeholders (whitespace inside the braces is
/// tolerated). Unknown placeholders render as empty.
fn render_template(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find("}}") {
            let key = after[..end].trim();
            if let Some((_, value)) = replacements.iter().find(|(k, _)| *k == key) {
                result.push_str(value);
            }
            rest = &after[end + 2..];
        } else {
            result.push_str(&rest[start..]);
            rest = "";
        }
    }
    result.push_str(rest);
    result
}

// =============================================================================
// Notification Dispatch
// =============================================================================

/// Send an order notification over the configured channel.
///
/// Channel rules: `sms` and `whatsapp` require their sender to be fully
/// configured; `automatic` prefers SMS and falls back to WhatsApp.
/// Failures are logged, never surfaced.
async fn dispatch_notification(
    relay: RelayClient,
    settings: ShopSettings,
    phone: String,
    message: String,
) {
    let Some(secret) = settings.api_secret.clone() else {
        return;
    };

    let sms_configured = settings.sms_enabled
        && settings.default_sms_mode.as_deref() == Some("devices")
        && settings.default_sms_device_id.is_some();
    let wa_configured = settings.whatsapp_enabled && settings.default_wa_account.is_some();

    let use_sms = match settings.notification_channel {
        NotificationChannel::Sms => sms_configured,
        NotificationChannel::Whatsapp => false,
        NotificationChannel::Automatic => sms_configured,
    };
    let use_wa = match settings.notification_channel {
        NotificationChannel::Sms => false,
        NotificationChannel::Whatsapp => wa_configured,
        NotificationChannel::Automatic => !sms_configured && wa_configured,
    };

    if use_sms {
        let sms = SmsMessage {
            mode: "devices".to_string(),
            phone,
            message,
            device: settings.default_sms_device_id.clone(),
            sim: settings.default_sms_sim.and_then(|s| u8::try_from(s).ok()),
            ..SmsMessage::default()
        };
        if let Err(e) = relay.send_sms(&secret, &sms).await {
            warn!(error = %e, "Failed to send order SMS");
        }
    } else if use_wa {
        if let Some(account) = settings.default_wa_account.clone() {
            let wa = WhatsappMessage::text(account, phone, message);
            if let Err(e) = relay.send_whatsapp(&secret, &wa).await {
                warn!(error = %e, "Failed to send order WhatsApp message");
            }
        }
    } else {
        info!("No configured channel for notification; skipping send");
    }
}

/// Best-effort contact bookkeeping: make sure the group exists, then
/// create or update the contact inside it. Needs the `get_groups`,
/// `create_group` and `create_contact` key permissions; a 403 is logged
/// with that hint.
async fn assign_contact_to_group(
    relay: &RelayClient,
    settings: &ShopSettings,
    name: &str,
    phone: &str,
    group_name: &str,
) {
    let Some(secret) = &settings.api_secret else {
        return;
    };

    let result = async {
        let groups = relay.get_groups(secret).await?;
        let group = match groups.iter().find(|g| g.name.as_deref() == Some(group_name)) {
            Some(group) => group.id,
            None => {
                relay.create_group(secret, group_name).await?;
                let groups = relay.get_groups(secret).await?;
                match groups.iter().find(|g| g.name.as_deref() == Some(group_name)) {
                    Some(group) => group.id,
                    None => return Ok(()),
                }
            }
        };

        let display_name = if name.is_empty() { phone } else { name };
        relay
            .create_contact(secret, display_name, phone, Some(&group.to_string()))
            .await
    }
    .await;

    match result {
        Ok(()) => info!(group = group_name, "Contact assigned to group"),
        Err(crate::relay::RelayError::Api { status: 403, message }) => {
            warn!(
                %message,
                "Contact management refused; key needs get_groups, create_group and create_contact permissions"
            );
        }
        Err(e) => warn!(error = %e, "Contact management failed"),
    }
}

/// Shared order-notification path for create/fulfilled webhooks.
async fn handle_order_notification(
    state: AppState,
    shop_domain: String,
    payload: OrderPayload,
    enabled: fn(&ShopSettings) -> bool,
    template_for: fn(&ShopSettings) -> &str,
    contact_group: Option<&'static str>,
) {
    let settings = match SettingsRepository::new(state.pool()).get(&shop_domain).await {
        Ok(Some(settings)) if settings.has_api_key() => settings,
        Ok(_) => return,
        Err(e) => {
            warn!(error = %e, "Failed to load shop settings for webhook");
            return;
        }
    };

    if !enabled(&settings) {
        return;
    }

    let Some(phone) = payload.phone().map(String::from) else {
        info!("No phone number found for order; skipping notification");
        return;
    };

    let customer_name = payload.customer_name().to_string();

    if let Some(group) = contact_group {
        assign_contact_to_group(state.relay(), &settings, &customer_name, &phone, group).await;
    }

    let message = render_template(
        template_for(&settings),
        &[
            ("order_name", payload.name.as_deref().unwrap_or("")),
            ("customer_name", &customer_name),
            ("tracking_url", payload.order_status_url.as_deref().unwrap_or("")),
        ],
    );

    // Fire and forget; the webhook response never waits on the provider.
    let relay = state.relay().clone();
    tokio::spawn(dispatch_notification(relay, settings, phone, message));
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /webhooks/orders/create
#[instrument(skip_all)]
async fn orders_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "Webhook received");

    let Ok(payload) = serde_json::from_slice::<OrderPayload>(&body) else {
        warn!("Unparseable order payload; acknowledging anyway");
        return Ok(StatusCode::OK);
    };

    handle_order_notification(
        state,
        shop_domain,
        payload,
        |s| s.notify_order_created,
        |s| {
            s.order_created_template
                .as_deref()
                .unwrap_or("Hi {{customer_name}}, we received your order {{order_name}}.")
        },
        Some(CUSTOMERS_GROUP),
    )
    .await;

    Ok(StatusCode::OK)
}

/// POST /webhooks/orders/fulfilled
#[instrument(skip_all)]
async fn orders_fulfilled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "Webhook received");

    let Ok(payload) = serde_json::from_slice::<OrderPayload>(&body) else {
        warn!("Unparseable order payload; acknowledging anyway");
        return Ok(StatusCode::OK);
    };

    handle_order_notification(
        state,
        shop_domain,
        payload,
        |s| s.notify_order_shipped,
        |s| {
            s.order_shipped_template
                .as_deref()
                .unwrap_or("Good news! Your order {{order_name}} has shipped.")
        },
        None,
    )
    .await;

    Ok(StatusCode::OK)
}

/// POST /webhooks/orders/cancelled
///
/// Always moves the contact to the non-customers group for future
/// campaign targeting; a cancellation message is only sent when the
/// shop has opted in.
#[instrument(skip_all)]
async fn orders_cancelled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "Webhook received");

    let Ok(payload) = serde_json::from_slice::<OrderPayload>(&body) else {
        return Ok(StatusCode::OK);
    };

    let settings = match SettingsRepository::new(state.pool()).get(&shop_domain).await {
        Ok(Some(settings)) if settings.has_api_key() => settings,
        Ok(_) => return Ok(StatusCode::OK),
        Err(e) => {
            warn!(error = %e, "Failed to load shop settings for webhook");
            return Ok(StatusCode::OK);
        }
    };

    let Some(phone) = payload.phone().map(String::from) else {
        return Ok(StatusCode::OK);
    };

    let customer_name = payload.customer_name().to_string();
    assign_contact_to_group(state.relay(), &settings, &customer_name, &phone, NON_CUSTOMERS_GROUP)
        .await;

    if settings.notify_order_cancelled {
        let message = render_template(
            settings
                .order_cancelled_template
                .as_deref()
                .unwrap_or("Your order {{order_name}} has been cancelled."),
            &[
                ("order_name", payload.name.as_deref().unwrap_or("")),
                ("customer_name", &customer_name),
            ],
        );
        let relay = state.relay().clone();
        tokio::spawn(dispatch_notification(relay, settings, phone, message));
    }

    Ok(StatusCode::OK)
}

/// POST /webhooks/app/uninstalled
///
/// Revokes provider keys best-effort and deletes all shop state. Runs
/// idempotently; Shopify delivers this webhook multiple times.
#[instrument(skip_all)]
async fn app_uninstalled(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "Webhook received");

    if let Err(e) = state.linking().purge(&shop_domain).await {
        warn!(error = %e, "Uninstall cleanup failed");
    }

    Ok(StatusCode::OK)
}

/// GDPR webhooks that only need acknowledgement: this service stores no
/// customer-level data.
#[instrument(skip_all)]
async fn gdpr_ack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "GDPR webhook acknowledged");
    Ok(StatusCode::OK)
}

/// POST /webhooks/shop/redact
///
/// Shopify sends this 48 hours after uninstall; delete whatever remains.
#[instrument(skip_all)]
async fn shop_redact(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    let shop_domain = authenticate(&state, &headers, &body)?;
    info!(shop = %shop_domain, topic = topic(&headers), "Webhook received");

    if let Err(e) = SettingsRepository::new(state.pool()).delete(&shop_domain).await {
        warn!(error = %e, "Shop redact cleanup failed");
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template_basic() {
        let out = render_template(
            "Hi {{customer_name}}, order {{order_name}} received.",
            &[("customer_name", "Ada"), ("order_name", "#1001")],
        );
        assert_eq!(out, "Hi Ada, order #1001 received.");
    }

    #[test]
    fn test_render_template_whitespace_in_braces() {
        let out = render_template("Track it: {{ tracking_url }}", &[("tracking_url", "https://x")]);
        assert_eq!(out, "Track it: https://x");
    }

    #[test]
    fn test_render_template_unknown_placeholder_is_empty() {
        let out = render_template("Hello {{nope}}!", &[("customer_name", "Ada")]);
        assert_eq!(out, "Hello !");
    }

    #[test]
    fn test_render_template_unclosed_braces_kept() {
        let out = render_template("broken {{oops", &[]);
        assert_eq!(out, "broken {{oops");
    }

    #[test]
    fn test_phone_precedence() {
        let payload = OrderPayload {
            phone: None,
            shipping_address: Some(OrderAddress {
                name: None,
                phone: Some("+15550001".to_string()),
            }),
            billing_address: Some(OrderAddress {
                name: None,
                phone: Some("+15550002".to_string()),
            }),
            customer: Some(OrderCustomer {
                first_name: None,
                last_name: None,
                phone: Some("+15550003".to_string()),
            }),
            ..OrderPayload::default()
        };
        assert_eq!(payload.phone(), Some("+15550001"));

        let payload = OrderPayload {
            customer: Some(OrderCustomer {
                first_name: None,
                last_name: None,
                phone: Some("+15550003".to_string()),
            }),
            ..OrderPayload::default()
        };
        assert_eq!(payload.phone(), Some("+15550003"));
    }

    #[test]
    fn test_phone_ignores_blank_values() {
        let payload = OrderPayload {
            phone: Some("   ".to_string()),
            ..OrderPayload::default()
        };
        assert_eq!(payload.phone(), None);
    }

    #[test]
    fn test_customer_name_fallback_chain() {
        let payload = OrderPayload {
            customer: Some(OrderCustomer {
                first_name: None,
                last_name: Some("Lovelace".to_string()),
                phone: None,
            }),
            billing_address: Some(OrderAddress {
                name: Some("A. Lovelace".to_string()),
                phone: None,
            }),
            ..OrderPayload::default()
        };
        assert_eq!(payload.customer_name(), "A. Lovelace");
    }

    #[test]
    fn test_verify_webhook_hmac_round_trip() {
        let secret = "shpss_test_secret";
        let body = br##"{"name":"#1001"}"##;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = BASE64.encode(mac.finalize().into_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(HMAC_HEADER, digest.parse().unwrap());
        assert!(verify_webhook_hmac(&headers, body, secret));

        // Tampered body fails
        assert!(!verify_webhook_hmac(&headers, b"{}", secret));
    }

    #[test]
    fn test_verify_webhook_hmac_missing_header() {
        assert!(!verify_webhook_hmac(&HeaderMap::new(), b"{}", "secret"));
    }

    #[test]
    fn test_verify_webhook_hmac_invalid_base64() {
        let mut headers = HeaderMap::new();
        headers.insert(HMAC_HEADER, "not base64!!!".parse().unwrap());
        assert!(!verify_webhook_hmac(&headers, b"{}", "secret"));
    }
}
