//! Gallery Tests
//!
//! Admin gallery management and the public listing, served from the dev
//! fallback.

mod common;

use axum::http::StatusCode;
use common::app;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn admin_adds_items_in_order() {
    let app = app().await;
    let admin = app.admin();
    let story_id = Uuid::new_v4();
    let path = format!("/admin/stories/{}/gallery", story_id);

    let first = app
        .post_json(
            &path,
            json!({
                "storage_key": format!("uploads/{}/{}.jpg", admin.id, Uuid::new_v4()),
                "content_type": "image/jpeg",
                "caption": "  The lake at dawn  "
            }),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.json()["position"], 1);
    assert_eq!(first.json()["kind"], "image");
    assert_eq!(first.json()["caption"], "The lake at dawn");

    let second = app
        .post_json(
            &path,
            json!({
                "storage_key": format!("uploads/{}/{}.mp4", admin.id, Uuid::new_v4()),
                "content_type": "video/mp4"
            }),
            Some(&admin.access_token),
        )
        .await;
    assert_eq!(second.status, StatusCode::CREATED);
    assert_eq!(second.json()["position"], 2);

    let listed = app.get(&format!("/stories/{}/gallery", story_id), None).await;
    assert_eq!(listed.status, StatusCode::OK);
    let items = listed.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["position"], 1);
    assert_eq!(items[1]["kind"], "video");
    assert!(items[0]["url"].is_string());

    let videos = app
        .get(&format!("/stories/{}/gallery?kind=video", story_id), None)
        .await;
    assert_eq!(videos.json()["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn galleries_are_scoped_to_their_story() {
    let app = app().await;
    let admin = app.admin();
    let story_a = Uuid::new_v4();
    let story_b = Uuid::new_v4();

    for story in [story_a, story_b] {
        app.post_json(
            &format!("/admin/stories/{}/gallery", story),
            json!({
                "storage_key": format!("uploads/{}/{}.png", admin.id, Uuid::new_v4()),
                "content_type": "image/png"
            }),
            Some(&admin.access_token),
        )
        .await;
    }

    let listed = app.get(&format!("/stories/{}/gallery", story_a), None).await;
    let items = listed.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["story_id"], story_a.to_string());
    assert_eq!(items[0]["position"], 1);
}

#[tokio::test]
async fn admin_removes_item() {
    let app = app().await;
    let admin = app.admin();
    let story_id = Uuid::new_v4();

    let created = app
        .post_json(
            &format!("/admin/stories/{}/gallery", story_id),
            json!({
                "storage_key": format!("uploads/{}/{}.webp", admin.id, Uuid::new_v4()),
                "content_type": "image/webp"
            }),
            Some(&admin.access_token),
        )
        .await;
    let item_path = format!("/admin/gallery/{}", created.json()["id"].as_str().unwrap());

    let resp = app.delete(&item_path, Some(&admin.access_token)).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    let again = app.delete(&item_path, Some(&admin.access_token)).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);

    let listed = app.get(&format!("/stories/{}/gallery", story_id), None).await;
    assert!(listed.json()["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn gallery_key_must_be_the_admins_upload() {
    let app = app().await;
    let admin = app.admin();

    let resp = app
        .post_json(
            &format!("/admin/stories/{}/gallery", Uuid::new_v4()),
            json!({
                "storage_key": format!("uploads/{}/{}.jpg", Uuid::new_v4(), Uuid::new_v4()),
                "content_type": "image/jpeg"
            }),
            Some(&admin.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "storage_key must be one of your uploads");
}

#[tokio::test]
async fn gallery_rejects_unknown_content_type() {
    let app = app().await;
    let admin = app.admin();

    let resp = app
        .post_json(
            &format!("/admin/stories/{}/gallery", Uuid::new_v4()),
            json!({
                "storage_key": format!("uploads/{}/{}.pdf", admin.id, Uuid::new_v4()),
                "content_type": "application/pdf"
            }),
            Some(&admin.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "unsupported content type");
}

#[tokio::test]
async fn gallery_rejects_types_that_cannot_be_uploaded() {
    let app = app().await;
    let admin = app.admin();

    let resp = app
        .post_json(
            &format!("/admin/stories/{}/gallery", Uuid::new_v4()),
            json!({
                "storage_key": format!("uploads/{}/{}.svg", admin.id, Uuid::new_v4()),
                "content_type": "image/svg+xml"
            }),
            Some(&admin.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "unsupported content type");
}

#[tokio::test]
async fn gallery_kind_filter_is_validated() {
    let app = app().await;

    let resp = app
        .get(&format!("/stories/{}/gallery?kind=audio", Uuid::new_v4()), None)
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "kind must be image or video");
}
