use axum::extract::DefaultBodyLimit;
use axum::{routing::delete, routing::get, routing::patch, routing::post, routing::put, Router};

use crate::http::handlers;
use crate::AppState;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn auth() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/revoke", post(handlers::revoke_token))
        .route("/auth/me", get(handlers::get_current_user))
}

pub fn tiers() -> Router<AppState> {
    Router::new().route("/tiers", get(handlers::list_tiers))
}

pub fn feed() -> Router<AppState> {
    Router::new().route("/feed", get(handlers::get_feed))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route("/posts/:id", get(handlers::get_post))
        .route("/posts/:id", patch(handlers::update_post))
        .route("/posts/:id", delete(handlers::delete_post))
        .route("/posts/:id/like", post(handlers::like_post))
        .route("/posts/:id/like", delete(handlers::unlike_post))
        .route("/posts/:id/stats", get(handlers::post_stats))
        .route("/posts/:id/comments", get(handlers::list_comments))
        .route("/posts/:id/comments", post(handlers::comment_post))
        .route(
            "/posts/:id/comments/:comment_id",
            delete(handlers::delete_comment),
        )
        .route("/posts/:id/purchase", post(handlers::purchase_post))
        .route("/purchases", get(handlers::list_purchases))
}

pub fn creators() -> Router<AppState> {
    Router::new()
        .route("/creators/:id", get(handlers::get_creator))
        .route("/creators/:id/follow", post(handlers::follow_creator))
        .route("/creators/:id/follow", delete(handlers::unfollow_creator))
}

pub fn uploads() -> Router<AppState> {
    // The multipart handler enforces UPLOAD_MAX_BYTES while streaming.
    Router::new()
        .route(
            "/uploads",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/uploads/intent", post(handlers::create_upload_intent))
}

/// Reader routes take a slug, except the gallery which takes the story id.
pub fn stories() -> Router<AppState> {
    Router::new()
        .route("/stories", get(handlers::list_stories))
        .route("/stories/:story", get(handlers::get_story))
        .route(
            "/stories/:story/chapters/:number",
            get(handlers::read_chapter),
        )
        .route("/stories/:story/gallery", get(handlers::list_gallery))
}

pub fn admin() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(handlers::admin_stats))
        .route("/admin/users", get(handlers::admin_list_users))
        .route("/admin/users/:id", patch(handlers::admin_update_user))
        .route("/admin/users/:id", delete(handlers::admin_delete_user))
        .route("/admin/stories", post(handlers::admin_create_story))
        .route("/admin/stories/:id", patch(handlers::admin_update_story))
        .route("/admin/stories/:id", delete(handlers::admin_delete_story))
        .route(
            "/admin/stories/:id/chapters",
            post(handlers::admin_create_chapter),
        )
        .route(
            "/admin/stories/:id/chapters/order",
            put(handlers::admin_reorder_chapters),
        )
        .route("/admin/chapters/:id", patch(handlers::admin_update_chapter))
        .route("/admin/chapters/:id", delete(handlers::admin_delete_chapter))
        .route(
            "/admin/stories/:id/gallery",
            post(handlers::admin_add_gallery_item),
        )
        .route("/admin/gallery/:id", delete(handlers::admin_remove_gallery_item))
}
