//! Auth Tests
//!
//! Registration validation and access-token handling. Everything here is
//! decided before the database is consulted.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::json;

// ===========================================================================
// Health
// ===========================================================================

#[tokio::test]
async fn health_reports_degraded_without_backing_services() {
    let app = app().await;

    let resp = app.get("/health", None).await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], false);
    assert_eq!(body["redis"], false);
    assert_eq!(body["dev_fallback"], true);
}

// ===========================================================================
// Registration validation
// ===========================================================================

#[tokio::test]
async fn register_rejects_invalid_email() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/register",
            json!({ "email": "not-an-email", "username": "reader_one", "password": "longenough" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "invalid email");
}

#[tokio::test]
async fn register_rejects_bad_username() {
    let app = app().await;
    let too_long = "x".repeat(33);

    for username in ["ab", "has space", "UPPER-dash", too_long.as_str()] {
        let resp = app
            .post_json(
                "/auth/register",
                json!({ "email": "reader@example.com", "username": username, "password": "longenough" }),
                None,
            )
            .await;

        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "username {:?}", username);
        assert_eq!(
            resp.error_message(),
            "username must be 3-32 characters of a-z, 0-9 or _"
        );
    }
}

#[tokio::test]
async fn register_enforces_password_length() {
    let app = app().await;

    let short = app
        .post_json(
            "/auth/register",
            json!({ "email": "reader@example.com", "username": "reader", "password": "short" }),
            None,
        )
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
    assert_eq!(short.error_message(), "password must be at least 8 characters");

    let long = app
        .post_json(
            "/auth/register",
            json!({ "email": "reader@example.com", "username": "reader", "password": "p".repeat(129) }),
            None,
        )
        .await;
    assert_eq!(long.status, StatusCode::BAD_REQUEST);
    assert_eq!(long.error_message(), "password must be at most 128 characters");
}

#[tokio::test]
async fn register_rejects_blank_display_name() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/register",
            json!({
                "email": "reader@example.com",
                "username": "reader",
                "display_name": "   ",
                "password": "longenough"
            }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "display_name cannot be empty");
}

#[tokio::test]
async fn login_requires_both_fields() {
    let app = app().await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "identifier": "", "password": "whatever" }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "identifier and password are required");
}

#[tokio::test]
async fn login_measures_password_in_characters() {
    let app = app().await;
    // 50 characters, 150 bytes: inside the limit registration applies.
    let password = "€".repeat(50);

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "identifier": "reader", "password": password }),
            None,
        )
        .await;

    assert_ne!(resp.status, StatusCode::BAD_REQUEST);
    assert_ne!(resp.error_message(), "password must be at most 128 characters");

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "identifier": "reader", "password": "€".repeat(129) }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "password must be at most 128 characters");
}

#[tokio::test]
async fn refresh_requires_a_token() {
    let app = app().await;

    let resp = app
        .post_json("/auth/refresh", json!({ "refresh_token": " " }), None)
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "refresh_token is required");
}

// ===========================================================================
// Access tokens
// ===========================================================================

#[tokio::test]
async fn me_requires_authorization_header() {
    let app = app().await;

    let resp = app.get("/auth/me", None).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "missing Authorization header");
}

#[tokio::test]
async fn me_rejects_garbage_token() {
    let app = app().await;

    let resp = app.get("/auth/me", Some("v4.local.garbage")).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid token");
}

#[tokio::test]
async fn me_rejects_non_bearer_scheme() {
    let app = app().await;
    let user = app.member();
    let header = format!("Token {}", user.access_token);

    let resp = app
        .request(
            axum::http::Method::GET,
            "/auth/me",
            None,
            &[("Authorization", header.as_str())],
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid Authorization header");
}

#[tokio::test]
async fn token_from_another_key_is_rejected() {
    let app = app().await;
    let other = app_with_other_keys().await;
    let user = other.member();

    let resp = app.get("/purchases", Some(&user.access_token)).await;

    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid token");
}

async fn app_with_other_keys() -> common::TestApp {
    let mut other = app().await;
    other.state.paseto_access_key = *b"ffffffffffffffffffffffffffffffff";
    other
}
