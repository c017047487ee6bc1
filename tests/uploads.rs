//! Upload Tests
//!
//! Multipart passthrough and presigned upload intents. Everything tested
//! here is rejected before the object store is contacted.

mod common;

use axum::http::StatusCode;
use common::{app, TEST_UPLOAD_MAX_BYTES};
use serde_json::json;

#[tokio::test]
async fn members_cannot_upload() {
    let app = app().await;
    let member = app.member();

    let resp = app
        .upload("image/png", b"not really", Some(&member.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "only creators can upload media");
}

#[tokio::test]
async fn unsupported_content_type_is_rejected() {
    let app = app().await;
    let creator = app.creator();

    let resp = app
        .upload("application/pdf", b"%PDF-1.7", Some(&creator.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "unsupported content type");
}

#[tokio::test]
async fn undecodable_image_is_rejected() {
    let app = app().await;
    let creator = app.creator();

    let resp = app
        .upload("image/png", b"definitely not a png", Some(&creator.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(resp.error_message().starts_with("invalid image"));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = app().await;
    let creator = app.creator();
    let body = vec![0u8; TEST_UPLOAD_MAX_BYTES as usize + 1];

    let resp = app
        .upload("video/mp4", &body, Some(&creator.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(resp.error_message(), "upload exceeds the size limit");
}

#[tokio::test]
async fn upload_intent_checks_size() {
    let app = app().await;
    let creator = app.creator();

    let zero = app
        .post_json(
            "/uploads/intent",
            json!({ "content_type": "video/mp4", "bytes": 0 }),
            Some(&creator.access_token),
        )
        .await;
    assert_eq!(zero.status, StatusCode::BAD_REQUEST);
    assert_eq!(zero.error_message(), "bytes must be positive");

    let huge = app
        .post_json(
            "/uploads/intent",
            json!({ "content_type": "video/mp4", "bytes": TEST_UPLOAD_MAX_BYTES + 1 }),
            Some(&creator.access_token),
        )
        .await;
    assert_eq!(huge.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn upload_intent_is_presigned_for_creator_prefix() {
    let app = app().await;
    let creator = app.creator();

    let resp = app
        .post_json(
            "/uploads/intent",
            json!({ "content_type": "video/mp4", "bytes": 4096 }),
            Some(&creator.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    let key = body["storage_key"].as_str().unwrap();
    assert!(key.starts_with(&format!("uploads/{}/", creator.id)));
    assert!(key.ends_with(".mp4"));
    assert!(body["upload_url"].as_str().unwrap().contains("X-Amz-Signature"));
    assert_eq!(body["expires_in_seconds"], 900);
}
