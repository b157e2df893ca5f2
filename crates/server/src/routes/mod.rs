//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness check
//! GET  /health/ready                    - Readiness check (database ping)
//!
//! # Linking API (shop identified by X-Shop-Domain header)
//! POST   /api/link/initialize           - Resolve or create provider account, send code
//! POST   /api/link/verify               - Verify emailed code, persist linkage
//! GET    /api/link/status               - Connection status with live provider data
//! POST   /api/link/api-key              - Issue and store a provider API key
//! DELETE /api/link/api-key              - Revoke provider keys and clear stored one
//! GET    /api/link/plans                - List provider subscription packages
//! POST   /api/link/plan                 - Subscribe the linked account to a package
//! POST   /api/link/sso                  - Create an SSO link into the provider dashboard
//! POST   /api/link/password-reset       - Trigger the provider's password recovery email
//! PUT    /api/link/settings/notifications - Save notification preferences
//! PUT    /api/link/settings/sender      - Save sender configuration
//! GET    /api/link/sender-options       - Live SMS devices and WhatsApp accounts
//! POST   /api/link/disconnect           - Revoke keys and clear the stored linkage
//!
//! # Shopify webhooks (HMAC-verified raw bodies)
//! POST /webhooks/orders/create          - Order confirmation notification
//! POST /webhooks/orders/fulfilled       - Shipping notification
//! POST /webhooks/orders/cancelled       - Contact bookkeeping, opt-in notification
//! POST /webhooks/app/uninstalled        - Revoke keys, delete shop state
//! POST /webhooks/customers/redact       - GDPR acknowledgement
//! POST /webhooks/customers/data_request - GDPR acknowledgement
//! POST /webhooks/shop/redact            - GDPR shop data deletion
//! ```

pub mod link;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the application router (health endpoints are added in `main`).
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/api/link", link::router())
        .nest("/webhooks", webhooks::router())
}
