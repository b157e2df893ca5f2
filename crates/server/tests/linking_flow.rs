//! Integration tests for the account-linking engine against a scripted
//! provider. Covers the reconciliation state machine: existing-account
//! detection, public-first creation with the privileged fallback, the
//! duplicate re-search, and the degraded terminal state.
//!
//! The engine only touches the database in `verify`, so these tests run
//! with a lazy pool that never connects. Code emails go to a dead SMTP
//! port; delivery failure is part of the contract being tested
//! (`code_email_sent` reports it, the flow never fails on it).

use std::sync::Arc;

use relaylink_core::Email;
use relaylink_server::config::{EmailConfig, RelayConfig};
use relaylink_server::relay::RelayClient;
use relaylink_server::services::{EmailService, LinkingError, LinkingService, VerificationStore};
use secrecy::SecretString;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn relay_config(server: &MockServer) -> RelayConfig {
    let base = server.uri();
    RelayConfig {
        admin_base_url: format!("{base}/admin"),
        api_base_url: format!("{base}/api"),
        web_base_url: base,
        system_token: Some(SecretString::from("test-system-token")),
        sso_plugin_token: Some(SecretString::from("test-plugin-token")),
        default_country: "US".to_string(),
        default_timezone: "America/New_York".to_string(),
        default_language_id: "1".to_string(),
        default_role_id: "2".to_string(),
    }
}

fn service_for(server: &MockServer) -> LinkingService {
    let relay = RelayClient::new(relay_config(server)).unwrap();
    let email_config = EmailConfig {
        smtp_host: "localhost".to_string(),
        smtp_port: 2525,
        smtp_username: "test".to_string(),
        smtp_password: SecretString::from("test"),
        from_address: "noreply@example.com".to_string(),
    };
    let email = EmailService::new(&email_config, server.uri()).unwrap();
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost/relaylink_unused")
        .unwrap();

    LinkingService::new(relay, email, Arc::new(VerificationStore::new()), pool)
}

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "status": 200, "message": "OK", "data": data })
}

async fn mount_user_listing(server: &MockServer, users: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(users)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn existing_account_gets_a_code_and_no_password() {
    let server = MockServer::start().await;
    mount_user_listing(
        &server,
        json!([{ "id": 42, "email": "merchant@example.com", "name": "Merchant" }]),
    )
    .await;

    let service = service_for(&server);
    let email = Email::parse("merchant@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Merchant").await.unwrap();

    assert!(!outcome.is_new_user);
    assert_eq!(outcome.identity.real_id().map(|id| id.as_i64()), Some(42));
    assert!(outcome.generated_password.is_none());
    // No SMTP server is listening; the flow still completes.
    assert!(!outcome.code_email_sent);
}

#[tokio::test]
async fn unknown_email_registers_through_the_public_form() {
    let server = MockServer::start().await;
    // First scan comes up empty; after registration the listing carries
    // the fresh account.
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_user_listing(
        &server,
        json!([{ "id": 77, "email": "new@example.com", "name": "Demo Shop" }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("new@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Demo Shop").await.unwrap();

    assert!(outcome.is_new_user);
    assert_eq!(outcome.identity.real_id().map(|id| id.as_i64()), Some(77));
    assert!(outcome.generated_password.is_some());
}

#[tokio::test]
async fn unlisted_registration_is_confirmed_by_the_login_probe() {
    let server = MockServer::start().await;
    mount_user_listing(&server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .mount(&server)
        .await;
    // The generated credentials log in: redirect with a session cookie,
    // landing on a page that bounces onward rather than back to login.
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/dashboard")
                .insert_header("set-cookie", "PHPSESSID=abc123; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/home"))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("invisible@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Demo Shop").await.unwrap();

    assert!(outcome.is_new_user);
    assert!(outcome.identity.is_degraded());
    assert!(outcome.generated_password.is_some());
}

#[tokio::test]
async fn unconfirmable_registration_falls_back_to_privileged_creation() {
    let server = MockServer::start().await;
    mount_user_listing(&server, json!([])).await;
    // The form says yes, but the account is neither listed nor loggable
    // into; the engine must not trust it.
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(
            { "id": 88, "email": "phantom@example.com", "name": "Demo Shop" }
        ))))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("phantom@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Demo Shop").await.unwrap();

    assert!(outcome.is_new_user);
    assert_eq!(outcome.identity.real_id().map(|id| id.as_i64()), Some(88));
}

#[tokio::test]
async fn creation_falls_back_to_the_privileged_endpoint() {
    let server = MockServer::start().await;
    mount_user_listing(&server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(
            { "id": 88, "email": "new@example.com", "name": "Demo Shop" }
        ))))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("new@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Demo Shop").await.unwrap();

    assert!(outcome.is_new_user);
    assert_eq!(outcome.identity.real_id().map(|id| id.as_i64()), Some(88));
    assert!(outcome.generated_password.is_some());
}

#[tokio::test]
async fn duplicate_rejection_resolves_the_existing_account() {
    let server = MockServer::start().await;
    // The initial scan misses the account; the post-duplicate re-search
    // finds it.
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_user_listing(
        &server,
        json!([{ "id": 42, "email": "taken@example.com", "name": "Merchant" }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400, "message": "Invalid Parameters!",
        })))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("taken@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Merchant").await.unwrap();

    assert!(!outcome.is_new_user);
    assert_eq!(outcome.identity.real_id().map(|id| id.as_i64()), Some(42));
    assert!(outcome.generated_password.is_none());
}

#[tokio::test]
async fn unlistable_duplicate_degrades_instead_of_blocking() {
    let server = MockServer::start().await;
    mount_user_listing(&server, json!([])).await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400, "message": "Invalid Parameters!",
        })))
        .mount(&server)
        .await;

    let service = service_for(&server);
    let email = Email::parse("hidden@example.com").unwrap();
    let outcome = service.initialize("demo.myshopify.com", &email, "Merchant").await.unwrap();

    // The account exists but the listing will not surface it; the
    // merchant still gets a code, bound to a degraded identity.
    assert!(!outcome.is_new_user);
    assert!(outcome.identity.is_degraded());
    assert!(outcome.generated_password.is_none());
}

#[tokio::test]
async fn creation_failure_on_both_paths_is_an_error() {
    let server = MockServer::start().await;
    // Nothing mounted: every provider call fails.

    let service = service_for(&server);
    let email = Email::parse("unlucky@example.com").unwrap();
    let err = service
        .initialize("demo.myshopify.com", &email, "Merchant")
        .await
        .unwrap_err();

    assert!(matches!(err, LinkingError::AccountCreation(_)));
}
