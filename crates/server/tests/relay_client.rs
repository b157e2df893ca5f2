//! Integration tests for the provider HTTP client, driven against a
//! local mock server. Exercises the admin surface (user lookup, account
//! and key management), the messaging API fallback, the SSO plugin and
//! the login-based password check.

use relaylink_core::{Email, RelayUserId};
use relaylink_server::config::RelayConfig;
use relaylink_server::relay::{NewAccount, RelayClient, RelayError, UserLookup};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, with_tokens: bool) -> RelayConfig {
    let base = server.uri();
    RelayConfig {
        admin_base_url: format!("{base}/admin"),
        api_base_url: format!("{base}/api"),
        web_base_url: base,
        system_token: with_tokens.then(|| SecretString::from("test-system-token")),
        sso_plugin_token: with_tokens.then(|| SecretString::from("test-plugin-token")),
        default_country: "US".to_string(),
        default_timezone: "America/New_York".to_string(),
        default_language_id: "1".to_string(),
        default_role_id: "2".to_string(),
    }
}

fn client_for(server: &MockServer, with_tokens: bool) -> RelayClient {
    RelayClient::new(config_for(server, with_tokens)).unwrap()
}

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "status": 200, "message": "OK", "data": data })
}

// ===== User lookup =====

#[tokio::test]
async fn find_user_matches_email_case_insensitively() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .and(query_param("token", "test-system-token"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            { "id": 7, "email": "other@example.com", "name": "Other" },
            { "id": 42, "email": "Merchant@Example.com", "name": "Merchant" },
        ]))))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    let user = lookup.found().expect("user should be found");
    assert_eq!(user.id, 42);
    assert_eq!(user.user_id(), Some(RelayUserId::new(42)));
}

#[tokio::test]
async fn find_user_walks_past_a_full_page() {
    let server = MockServer::start().await;

    let page_one: Vec<serde_json::Value> = (1..=250)
        .map(|i| json!({ "id": i, "email": format!("user{i}@example.com") }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(page_one))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            { "id": 300, "email": "merchant@example.com" },
        ]))))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    assert_eq!(lookup.found().map(|u| u.id), Some(300));
}

#[tokio::test]
async fn find_user_is_indeterminate_at_the_page_cap() {
    let server = MockServer::start().await;

    // Every page is full, so the scan never reaches a terminator.
    let full_page: Vec<serde_json::Value> = (1..=250)
        .map(|i| json!({ "id": 1000 + i, "email": format!("user{i}@example.com") }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(full_page))))
        .expect(200)
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("missing@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    // An endless listing is an incomplete scan, not proof of absence.
    assert!(matches!(lookup, UserLookup::Indeterminate));
}

#[tokio::test]
async fn find_user_reports_not_found_after_clean_scan() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("nobody@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    assert!(matches!(lookup, UserLookup::NotFound));
}

#[tokio::test]
async fn find_user_is_indeterminate_without_token() {
    let server = MockServer::start().await;

    let client = client_for(&server, false);
    let email = Email::parse("merchant@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    assert!(matches!(lookup, UserLookup::Indeterminate));
}

#[tokio::test]
async fn find_user_is_indeterminate_on_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/get/users"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();
    let lookup = client.find_user_by_email(&email).await.unwrap();

    // A failed scan proves nothing about absence.
    assert!(matches!(lookup, UserLookup::Indeterminate));
}

// ===== Account creation =====

#[tokio::test]
async fn create_user_returns_the_new_account() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .and(body_string_contains("token=test-system-token"))
        .and(body_string_contains("country=US"))
        .and(body_string_contains("role=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": 99, "email": "new@example.com", "name": "Demo Shop",
        }))))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("new@example.com").unwrap();
    let user = client
        .create_user_privileged("Demo Shop", &email, "s3cret-password")
        .await
        .unwrap();

    assert_eq!(user.id, 99);
}

#[tokio::test]
async fn create_user_maps_duplicate_email_to_already_exists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/create/user"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "status": 400, "message": "Invalid Parameters!",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("taken@example.com").unwrap();
    let err = client
        .create_user_privileged("Demo Shop", &email, "s3cret-password")
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::AlreadyExists(_)));
}

// ===== Messaging API =====

#[tokio::test]
async fn messaging_api_falls_back_to_get_on_405() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/get/credits"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/get/credits"))
        .and(query_param("secret", "key-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(1234))))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let secret = SecretString::from("key-secret");
    let credits = client.get_credits(&secret).await.unwrap();

    assert_eq!(credits, json!(1234));
}

#[tokio::test]
async fn messaging_api_surfaces_in_band_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/get/subscription"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 401, "message": "Invalid API secret!",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let secret = SecretString::from("bad-secret");
    let err = client.get_subscription(&secret).await.unwrap_err();

    assert!(matches!(err, RelayError::Api { status: 401, .. }));
}

// ===== API key revocation =====

#[tokio::test]
async fn delete_all_api_keys_tolerates_partial_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/get/apikeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            { "id": 1, "name": "Shopify (a.myshopify.com)" },
            { "id": 2, "name": "Shopify (b.myshopify.com)" },
        ]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/delete/apikey"))
        .and(body_string_contains("id=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(null))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/delete/apikey"))
        .and(body_string_contains("id=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 500, "message": "boom",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let deleted = client
        .delete_all_api_keys(RelayUserId::new(42))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
}

// ===== SSO =====

#[tokio::test]
async fn sso_link_returns_validated_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin"))
        .and(query_param("name", "shopify-sso"))
        .and(query_param("action", "sso_link"))
        .and(query_param("user", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "data": { "url": "https://hoprelay.com/sso/abc123" },
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let url = client
        .create_sso_link(RelayUserId::new(42), "dashboard")
        .await
        .unwrap();

    assert_eq!(url, "https://hoprelay.com/sso/abc123");
}

#[tokio::test]
async fn sso_link_rejects_untrusted_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "data": { "url": "https://evil.example/sso/abc123" },
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let err = client
        .create_sso_link(RelayUserId::new(42), "dashboard")
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Parse(_)));
}

#[tokio::test]
async fn sso_link_rejects_traversal_in_redirect() {
    let server = MockServer::start().await;

    let client = client_for(&server, true);
    let err = client
        .create_sso_link(RelayUserId::new(42), "../admin")
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::InvalidInput(_)));
}

// ===== Web surface =====

#[tokio::test]
async fn register_public_accepts_redirect_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_string_contains("terms=1"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let account = NewAccount {
        name: "Demo Shop".to_string(),
        email: "new@example.com".to_string(),
        password: "s3cret-password".to_string(),
    };

    assert!(client.register_public(&account).await.is_ok());
}

#[tokio::test]
async fn verify_password_accepts_dashboard_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/dashboard")
                .insert_header("set-cookie", "PHPSESSID=abc123; path=/; HttpOnly"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/home"))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();

    assert!(client.verify_password(&email, "correct-password").await);
}

#[tokio::test]
async fn verify_password_rejects_bounce_back_to_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/")
                .insert_header("set-cookie", "PHPSESSID=abc123; path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/auth/login"))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();

    assert!(!client.verify_password(&email, "wrong-password").await);
}

#[tokio::test]
async fn verify_password_rejects_rendered_login_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/auth/login")
                .insert_header("set-cookie", "PHPSESSID=abc123; path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form method="post"><input name="email"><input name="password"></form>"#,
        ))
        .mount(&server)
        .await;

    let client = client_for(&server, true);
    let email = Email::parse("merchant@example.com").unwrap();

    assert!(!client.verify_password(&email, "wrong-password").await);
}

#[tokio::test]
async fn verify_password_fails_closed_on_network_error() {
    let server = MockServer::start().await;
    let client = client_for(&server, true);
    drop(server);

    let email = Email::parse("merchant@example.com").unwrap();
    assert!(!client.verify_password(&email, "any-password").await);
}
