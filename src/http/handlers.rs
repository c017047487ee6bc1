use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::BytesMut;
use serde::{Deserialize, Deserializer, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::auth::{AuthService, TokenPair};
use crate::app::engagement::EngagementService;
use crate::app::feed::{FeedQuery, FeedScope, FeedService};
use crate::app::gallery::{GalleryService, NewGalleryItem};
use crate::app::media::{
    is_owned_upload_key, supported_kind, MediaService, UploadIntent, UploadedObject,
};
use crate::app::posts::{NewAsset, NewPost, PostChanges, PostService};
use crate::app::purchases::{PurchaseResult, PurchaseService};
use crate::app::social::{FollowOutcome, SocialService};
use crate::app::stories::{
    ChapterAccess, ChapterChanges, ChapterView, NewChapter, NewStory, StoryChanges, StoryDetail,
    StoryService,
};
use crate::app::tiers::TierService;
use crate::app::users::{DashboardStats, UserService};
use crate::domain::engagement::{Comment, EngagementStats, Purchase};
use crate::domain::feed::FeedItem;
use crate::domain::post::{MediaKind, MediaPost};
use crate::domain::story::{Chapter, ChapterSummary, GalleryItem, Story};
use crate::domain::tier::Tier;
use crate::domain::user::{normalize_email, normalize_username, PublicUser, Role, User};
use crate::http::{AdminUser, AppError, AuthUser};
use crate::infra::db::{is_foreign_key_violation, is_unavailable, unique_violation};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_TITLE_LEN: usize = 200;
const MAX_BODY_LEN: usize = 20_000;
const MAX_PRICE_CENTS: i64 = 1_000_000;
const MAX_ASSETS: usize = 20;
const MAX_COMMENT_LEN: usize = 1_000;
const MAX_DISPLAY_NAME_LEN: usize = 64;
const MAX_CAPTION_LEN: usize = 500;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    database: bool,
    redis: bool,
    dev_fallback: bool,
}

#[derive(Deserialize)]
pub struct PaginationQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

fn parse_cursor(cursor: Option<String>) -> Result<Option<(OffsetDateTime, Uuid)>, AppError> {
    let Some(cursor) = cursor else {
        return Ok(None);
    };

    let mut parts = cursor.splitn(2, '/');
    let timestamp = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;
    let id = parts
        .next()
        .ok_or_else(|| AppError::bad_request("invalid cursor"))?;

    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339)
        .map_err(|_| AppError::bad_request("invalid cursor"))?;
    let id = Uuid::parse_str(id).map_err(|_| AppError::bad_request("invalid cursor"))?;

    Ok(Some((timestamp, id)))
}

fn encode_cursor(cursor: Option<(OffsetDateTime, Uuid)>) -> Option<String> {
    let (timestamp, id) = cursor?;
    let timestamp = timestamp.format(&Rfc3339).ok()?;
    Some(format!("{}/{}", timestamp, id))
}

fn page_limit(limit: Option<i64>) -> Result<i64, AppError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::bad_request("limit must be between 1 and 100"));
    }
    Ok(limit)
}

/// Splits a `limit + 1` page into the page and the cursor of its last item.
fn split_page<T>(
    mut items: Vec<T>,
    limit: i64,
    key: impl Fn(&T) -> (OffsetDateTime, Uuid),
) -> (Vec<T>, Option<String>) {
    if items.len() > limit as usize {
        items.truncate(limit as usize);
        let next = items.last().map(&key);
        (items, encode_cursor(next))
    } else {
        (items, None)
    }
}

/// PATCH fields: absent stays `None`, explicit `null` becomes `Some(None)`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.paseto_access_key,
        state.paseto_refresh_key,
        state.access_ttl_minutes,
        state.refresh_ttl_days,
    )
}

fn media_service(state: &AppState) -> MediaService {
    MediaService::new(state.cache.clone(), state.storage.clone())
}

fn feed_service(state: &AppState) -> FeedService {
    FeedService::new(
        state.db.clone(),
        state.cache.clone(),
        media_service(state),
        state.fallback.clone(),
        state.feed_cache_ttl_seconds,
        state.media_url_ttl_seconds,
    )
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.db.ping().await.is_ok();
    let redis = state.cache.ping().await.is_ok();
    let status = if database && redis { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        database,
        redis,
        dev_fallback: state.fallback.is_some(),
    })
}

// ---- auth ----

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let email = normalize_email(&payload.email)
        .ok_or_else(|| AppError::bad_request("invalid email"))?;
    let username = normalize_username(&payload.username).ok_or_else(|| {
        AppError::bad_request("username must be 3-32 characters of a-z, 0-9 or _")
    })?;
    let display_name = match payload.display_name {
        Some(name) => validate_display_name(&name)?,
        None => username.clone(),
    };
    let password_len = payload.password.chars().count();
    if password_len < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at least 8 characters"));
    }
    if password_len > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let user = auth_service(&state)
        .register(email, username, display_name, payload.password)
        .await
        .map_err(|err| {
            if let Some(constraint) = unique_violation(&err) {
                if constraint.contains("username") {
                    return AppError::conflict("username already taken");
                }
                if constraint.contains("email") {
                    return AppError::conflict("email already registered");
                }
                return AppError::conflict("account already exists");
            }
            tracing::error!(error = ?err, "failed to register user");
            AppError::internal("failed to register user")
        })?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    /// Email or username.
    pub identifier: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_expires_at: OffsetDateTime,
}

impl From<TokenPair> for AuthTokenResponse {
    fn from(tokens: TokenPair) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: tokens.access_expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.identifier.trim().is_empty() || payload.password.trim().is_empty() {
        return Err(AppError::bad_request("identifier and password are required"));
    }
    // Counted in chars, matching registration.
    if payload.password.chars().count() > MAX_PASSWORD_LEN {
        return Err(AppError::bad_request("password must be at most 128 characters"));
    }

    let tokens = auth_service(&state)
        .login(&payload.identifier, &payload.password)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to login");
            AppError::internal("failed to login")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(tokens.into())),
        None => Err(AppError::unauthorized("invalid credentials")),
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    if payload.refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refresh_token is required"));
    }

    let tokens = auth_service(&state)
        .refresh(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to refresh token");
            AppError::internal("failed to refresh token")
        })?;

    match tokens {
        Some(tokens) => Ok(Json(tokens.into())),
        None => Err(AppError::unauthorized("invalid refresh token")),
    }
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<StatusCode, AppError> {
    if payload.refresh_token.trim().is_empty() {
        return Err(AppError::bad_request("refresh_token is required"));
    }

    let revoked = auth_service(&state)
        .revoke_refresh_token(&payload.refresh_token)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to revoke token");
            AppError::internal("failed to revoke token")
        })?;

    if !revoked {
        tracing::debug!("revoke called with unknown or already revoked token");
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_current_user(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let user = auth_service(&state)
        .get_current_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to fetch current user");
            AppError::internal("failed to fetch current user")
        })?;

    match user {
        Some(user) => Ok(Json(user)),
        None => Err(AppError::not_found("user not found")),
    }
}

fn validate_display_name(raw: &str) -> Result<String, AppError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("display_name cannot be empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(AppError::bad_request("display_name must be at most 64 characters"));
    }
    Ok(name.to_string())
}

// ---- tiers & feed ----

pub async fn list_tiers(State(state): State<AppState>) -> Result<Json<Vec<Tier>>, AppError> {
    let tiers = TierService::new(state.db.clone())
        .list_tiers()
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list tiers");
            AppError::internal("failed to list tiers")
        })?;
    Ok(Json(tiers))
}

#[derive(Deserialize)]
pub struct FeedParams {
    pub scope: Option<String>,
    pub creator: Option<Uuid>,
    pub kind: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

fn parse_kind(kind: Option<&str>) -> Result<Option<MediaKind>, AppError> {
    match kind {
        None => Ok(None),
        Some(kind) => MediaKind::from_db(kind)
            .map(Some)
            .ok_or_else(|| AppError::bad_request("kind must be image or video")),
    }
}

pub async fn get_feed(
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<ListResponse<FeedItem>>, AppError> {
    let limit = page_limit(params.limit)?;
    let cursor = parse_cursor(params.cursor)?;
    let scope = match params.scope.as_deref() {
        None => FeedScope::All,
        Some(scope) => FeedScope::parse(scope)
            .ok_or_else(|| AppError::bad_request("scope must be all or following"))?,
    };
    if scope == FeedScope::Following && auth.is_none() {
        return Err(AppError::unauthorized("sign in to see followed creators"));
    }
    let query = FeedQuery {
        scope,
        creator_id: params.creator,
        kind: parse_kind(params.kind.as_deref())?,
    };

    let viewer = auth.map(|user| user.viewer());
    let page = feed_service(&state)
        .get_feed(viewer, query, cursor, limit)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, viewer_id = ?viewer.map(|(id, _)| id), "failed to load feed");
            AppError::internal("failed to load feed")
        })?;

    let next_cursor = encode_cursor(page.next_cursor());
    Ok(Json(ListResponse {
        items: page.items,
        next_cursor,
    }))
}

// ---- posts ----

#[derive(Deserialize)]
pub struct AssetRequest {
    pub storage_key: String,
    pub content_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub price_cents: Option<i64>,
    pub required_tier_id: Option<Uuid>,
    #[serde(default)]
    pub assets: Vec<AssetRequest>,
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::bad_request("title must be at most 200 characters"));
    }
    Ok(title.to_string())
}

fn validate_body(body: &str) -> Result<(), AppError> {
    if body.chars().count() > MAX_BODY_LEN {
        return Err(AppError::bad_request("body must be at most 20000 characters"));
    }
    Ok(())
}

fn validate_price(price_cents: Option<i64>) -> Result<(), AppError> {
    if let Some(price) = price_cents {
        if !(0..=MAX_PRICE_CENTS).contains(&price) {
            return Err(AppError::bad_request(
                "price_cents must be between 0 and 1000000",
            ));
        }
    }
    Ok(())
}

pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<MediaPost>), AppError> {
    if !auth.role.can_publish() {
        return Err(AppError::forbidden("only creators can publish posts"));
    }
    let title = validate_title(&payload.title)?;
    validate_body(&payload.body)?;
    validate_price(payload.price_cents)?;
    if payload.assets.len() > MAX_ASSETS {
        return Err(AppError::bad_request("a post can have at most 20 assets"));
    }
    for asset in &payload.assets {
        if !is_owned_upload_key(auth.user_id, &asset.storage_key) {
            return Err(AppError::bad_request("asset key must be one of your uploads"));
        }
        if supported_kind(&asset.content_type).is_none() {
            return Err(AppError::bad_request("unsupported content type"));
        }
    }

    let post = NewPost {
        title,
        body: payload.body,
        price_cents: payload.price_cents,
        required_tier_id: payload.required_tier_id,
        assets: payload
            .assets
            .into_iter()
            .map(|asset| NewAsset {
                storage_key: asset.storage_key,
                content_type: asset.content_type,
                width: asset.width,
                height: asset.height,
            })
            .collect(),
    };

    let mut post = PostService::new(state.db.clone())
        .create_post(auth.user_id, post)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.contains("tier not found") || message.contains("unsupported content type") {
                return AppError::bad_request(message);
            }
            tracing::error!(error = ?err, creator_id = %auth.user_id, "failed to create post");
            AppError::internal("failed to create post")
        })?;
    feed_service(&state).invalidate_posts().await;

    media_service(&state)
        .populate_asset_urls(&mut post.assets, state.media_url_ttl_seconds)
        .await;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post(
    Path(id): Path<Uuid>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> Result<Json<FeedItem>, AppError> {
    let item = feed_service(&state)
        .view_post(auth.map(|user| user.viewer()), id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to fetch post");
            AppError::internal("failed to fetch post")
        })?;

    item.map(Json)
        .ok_or_else(|| AppError::not_found("post not found"))
}

#[derive(Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub price_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub required_tier_id: Option<Option<Uuid>>,
}

pub async fn update_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<Json<MediaPost>, AppError> {
    let title = payload.title.as_deref().map(validate_title).transpose()?;
    if let Some(ref body) = payload.body {
        validate_body(body)?;
    }
    validate_price(payload.price_cents.flatten())?;

    let changes = PostChanges {
        title,
        body: payload.body,
        price_cents: payload.price_cents,
        required_tier_id: payload.required_tier_id,
    };

    let post = PostService::new(state.db.clone())
        .update_post(id, auth.user_id, auth.is_admin(), changes)
        .await
        .map_err(|err| {
            if err.to_string().contains("tier not found") {
                return AppError::bad_request("tier not found");
            }
            tracing::error!(error = ?err, post_id = %id, "failed to update post");
            AppError::internal("failed to update post")
        })?;

    let Some(mut post) = post else {
        return Err(AppError::not_found("post not found"));
    };
    // Price and tier changes move can_view on every cached page.
    feed_service(&state).invalidate_posts().await;
    media_service(&state)
        .populate_asset_urls(&mut post.assets, state.media_url_ttl_seconds)
        .await;
    Ok(Json(post))
}

pub async fn delete_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let keys = PostService::new(state.db.clone())
        .delete_post(id, auth.user_id, auth.is_admin())
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to delete post");
            AppError::internal("failed to delete post")
        })?;

    let Some(keys) = keys else {
        return Err(AppError::not_found("post not found"));
    };
    media_service(&state).delete_objects(&keys).await;
    feed_service(&state).invalidate_posts().await;

    tracing::info!(post_id = %id, actor_id = %auth.user_id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---- engagement ----

#[derive(Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    /// False when nothing changed.
    pub changed: bool,
}

pub async fn like_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let like = EngagementService::new(state.db.clone(), state.fallback.clone())
        .like_post(auth.user_id, id)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                return AppError::not_found("post not found");
            }
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to like post");
            AppError::internal("failed to like post")
        })?;

    Ok(Json(LikeResponse {
        liked: true,
        changed: like.is_some(),
    }))
}

pub async fn unlike_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let removed = EngagementService::new(state.db.clone(), state.fallback.clone())
        .unlike_post(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to unlike post");
            AppError::internal("failed to unlike post")
        })?;

    Ok(Json(LikeResponse {
        liked: false,
        changed: removed,
    }))
}

pub async fn post_stats(
    Path(id): Path<Uuid>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> Result<Json<EngagementStats>, AppError> {
    let stats = EngagementService::new(state.db.clone(), state.fallback.clone())
        .stats(id, auth.map(|user| user.user_id))
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to load post stats");
            AppError::internal("failed to load post stats")
        })?;
    Ok(Json(stats))
}

pub async fn list_comments(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Comment>>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let comments = EngagementService::new(state.db.clone(), state.fallback.clone())
        .list_comments(id, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to list comments");
            AppError::internal("failed to list comments")
        })?;

    let (items, next_cursor) = split_page(comments, limit, |c| (c.created_at, c.id));
    Ok(Json(ListResponse { items, next_cursor }))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

pub async fn comment_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let body = payload.body.trim();
    if body.is_empty() {
        return Err(AppError::bad_request("comment cannot be empty"));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::bad_request("comment must be at most 1000 characters"));
    }

    let comment = EngagementService::new(state.db.clone(), state.fallback.clone())
        .comment_post(auth.user_id, id, body.to_string())
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                return AppError::not_found("post not found");
            }
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to comment");
            AppError::internal("failed to comment")
        })?;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn delete_comment(
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let deleted = EngagementService::new(state.db.clone(), state.fallback.clone())
        .delete_comment(comment_id, post_id, auth.user_id, auth.is_admin())
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, comment_id = %comment_id, "failed to delete comment");
            AppError::internal("failed to delete comment")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("comment not found"))
    }
}

// ---- purchases ----

#[derive(Serialize)]
pub struct PurchaseResponse {
    pub purchase: Purchase,
    pub created: bool,
}

pub async fn purchase_post(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<PurchaseResponse>, AppError> {
    let result = PurchaseService::new(state.db.clone(), state.fallback.clone())
        .purchase(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, post_id = %id, "failed to purchase post");
            AppError::internal("failed to purchase post")
        })?;

    let outcome = match result {
        PurchaseResult::PostNotFound => return Err(AppError::not_found("post not found")),
        PurchaseResult::Free => return Err(AppError::bad_request("post is free")),
        PurchaseResult::Purchased(outcome) => outcome,
    };

    if outcome.created {
        feed_service(&state).invalidate(auth.user_id).await;
    }
    Ok(Json(PurchaseResponse {
        purchase: outcome.purchase,
        created: outcome.created,
    }))
}

pub async fn list_purchases(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ListResponse<Purchase>>, AppError> {
    let purchases = PurchaseService::new(state.db.clone(), state.fallback.clone())
        .list_for_user(auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %auth.user_id, "failed to list purchases");
            AppError::internal("failed to list purchases")
        })?;

    Ok(Json(ListResponse {
        items: purchases,
        next_cursor: None,
    }))
}

// ---- follows ----

pub async fn get_creator(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PublicUser>, AppError> {
    let user = UserService::new(state.db.clone())
        .get_user(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to fetch creator");
            AppError::internal("failed to fetch creator")
        })?;

    match user {
        Some(user) if user.role.can_publish() => Ok(Json(user.into())),
        _ => Err(AppError::not_found("creator not found")),
    }
}

#[derive(Serialize)]
pub struct FollowResponse {
    pub following: bool,
    pub changed: bool,
}

pub async fn follow_creator(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FollowResponse>, AppError> {
    if auth.user_id == id {
        return Err(AppError::bad_request("cannot follow yourself"));
    }

    let outcome = SocialService::new(state.db.clone())
        .follow(auth.user_id, id)
        .await
        .map_err(|err| {
            if err.to_string().contains("not a creator") {
                return AppError::bad_request("user is not a creator");
            }
            tracing::error!(error = ?err, follower_id = %auth.user_id, creator_id = %id, "failed to follow creator");
            AppError::internal("failed to follow creator")
        })?;

    let changed = match outcome {
        None => return Err(AppError::not_found("creator not found")),
        Some(FollowOutcome::Followed(_)) => true,
        Some(FollowOutcome::AlreadyFollowing) => false,
    };
    if changed {
        feed_service(&state).invalidate(auth.user_id).await;
    }
    Ok(Json(FollowResponse {
        following: true,
        changed,
    }))
}

pub async fn unfollow_creator(
    Path(id): Path<Uuid>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FollowResponse>, AppError> {
    let removed = SocialService::new(state.db.clone())
        .unfollow(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, follower_id = %auth.user_id, creator_id = %id, "failed to unfollow creator");
            AppError::internal("failed to unfollow creator")
        })?;

    if removed {
        feed_service(&state).invalidate(auth.user_id).await;
    }
    Ok(Json(FollowResponse {
        following: false,
        changed: removed,
    }))
}

// ---- uploads ----

pub async fn upload(
    auth: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadedObject>), AppError> {
    if !auth.role.can_publish() {
        return Err(AppError::forbidden("only creators can upload media"));
    }

    let max_bytes = state.upload_max_bytes.max(0) as usize;
    let mut file = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::bad_request("invalid multipart body"))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("file content type is required"))?;

        let mut body = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| AppError::bad_request("invalid multipart body"))?
        {
            if body.len() + chunk.len() > max_bytes {
                return Err(AppError::payload_too_large("upload exceeds the size limit"));
            }
            body.extend_from_slice(&chunk);
        }
        file = Some((content_type, body.freeze()));
        break;
    }

    let (content_type, body) = file.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if body.is_empty() {
        return Err(AppError::bad_request("file is empty"));
    }

    let uploaded = media_service(&state)
        .upload(auth.user_id, &content_type, body)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.contains("unsupported content type") || message.starts_with("invalid image") {
                return AppError::bad_request(message);
            }
            tracing::error!(error = ?err, owner_id = %auth.user_id, "failed to store upload");
            AppError::internal("failed to store upload")
        })?;

    Ok((StatusCode::CREATED, Json(uploaded)))
}

#[derive(Deserialize)]
pub struct UploadIntentRequest {
    pub content_type: String,
    pub bytes: i64,
}

pub async fn create_upload_intent(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UploadIntentRequest>,
) -> Result<Json<UploadIntent>, AppError> {
    if !auth.role.can_publish() {
        return Err(AppError::forbidden("only creators can upload media"));
    }
    if payload.bytes <= 0 {
        return Err(AppError::bad_request("bytes must be positive"));
    }
    if payload.bytes > state.upload_max_bytes {
        return Err(AppError::payload_too_large("upload exceeds the size limit"));
    }

    let intent = media_service(&state)
        .create_upload_intent(
            auth.user_id,
            &payload.content_type,
            payload.bytes,
            state.upload_url_ttl_seconds,
        )
        .await
        .map_err(|err| {
            if err.to_string().contains("unsupported content type") {
                return AppError::bad_request("unsupported content type");
            }
            tracing::error!(error = ?err, owner_id = %auth.user_id, "failed to create upload intent");
            AppError::internal("failed to create upload intent")
        })?;

    Ok(Json(intent))
}

// ---- stories (reader) ----

pub async fn list_stories(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<Story>>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;

    let stories = StoryService::new(state.db.clone())
        .list_published(cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list stories");
            AppError::internal("failed to list stories")
        })?;

    let (items, next_cursor) = split_page(stories, limit, |s| (s.created_at, s.id));
    Ok(Json(ListResponse { items, next_cursor }))
}

pub async fn get_story(
    Path(slug): Path<String>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> Result<Json<StoryDetail>, AppError> {
    let story = StoryService::new(state.db.clone())
        .get_by_slug(&slug, auth.map(|user| user.viewer()))
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, slug = %slug, "failed to fetch story");
            AppError::internal("failed to fetch story")
        })?;

    story
        .map(Json)
        .ok_or_else(|| AppError::not_found("story not found"))
}

pub async fn read_chapter(
    Path((slug, number)): Path<(String, i32)>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
) -> Result<Json<ChapterView>, AppError> {
    let access = StoryService::new(state.db.clone())
        .read_chapter(&slug, number, auth.map(|user| user.viewer()))
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, slug = %slug, number, "failed to read chapter");
            AppError::internal("failed to read chapter")
        })?;

    match access {
        ChapterAccess::Readable(view) => Ok(Json(view)),
        ChapterAccess::UpgradeRequired { .. } => Err(AppError::forbidden("upgrade required")),
        ChapterAccess::NotFound => Err(AppError::not_found("chapter not found")),
    }
}

#[derive(Deserialize)]
pub struct GalleryQuery {
    pub kind: Option<String>,
}

pub async fn list_gallery(
    Path(story_id): Path<Uuid>,
    auth: Option<AuthUser>,
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<ListResponse<GalleryItem>>, AppError> {
    let kind = parse_kind(query.kind.as_deref())?;
    let is_admin = auth.map(|user| user.is_admin()).unwrap_or(false);

    // Story visibility needs the database; on the dev fallback the gallery
    // is served without it.
    match StoryService::new(state.db.clone()).get_story(story_id).await {
        Ok(Some(story)) if story.published || is_admin => {}
        Ok(_) => return Err(AppError::not_found("story not found")),
        Err(err) if state.fallback.is_some() && is_unavailable(&err) => {}
        Err(err) => {
            tracing::error!(error = ?err, story_id = %story_id, "failed to fetch story");
            return Err(AppError::internal("failed to fetch story"));
        }
    }

    let mut items = GalleryService::new(state.db.clone(), state.fallback.clone())
        .list(story_id, kind)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, story_id = %story_id, "failed to list gallery");
            AppError::internal("failed to list gallery")
        })?;

    media_service(&state)
        .populate_gallery_urls(&mut items, state.media_url_ttl_seconds)
        .await;
    Ok(Json(ListResponse {
        items,
        next_cursor: None,
    }))
}

// ---- admin ----

pub async fn admin_stats(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<DashboardStats>, AppError> {
    let stats = UserService::new(state.db.clone())
        .dashboard_stats()
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to load dashboard stats");
            AppError::internal("failed to load dashboard stats")
        })?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct AdminUsersQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

pub async fn admin_list_users(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Query(query): Query<AdminUsersQuery>,
) -> Result<Json<ListResponse<User>>, AppError> {
    let limit = page_limit(query.limit)?;
    let cursor = parse_cursor(query.cursor)?;
    let search = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty());

    let users = UserService::new(state.db.clone())
        .list_users(search, cursor, limit + 1)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to list users");
            AppError::internal("failed to list users")
        })?;

    let (items, next_cursor) = split_page(users, limit, |u| (u.created_at, u.id));
    Ok(Json(ListResponse { items, next_cursor }))
}

#[derive(Deserialize)]
pub struct AdminUpdateUserRequest {
    pub role: Option<Role>,
    pub tier_id: Option<Uuid>,
    pub display_name: Option<String>,
}

pub async fn admin_update_user(
    Path(id): Path<Uuid>,
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    let display_name = payload
        .display_name
        .as_deref()
        .map(validate_display_name)
        .transpose()?;

    let user = UserService::new(state.db.clone())
        .update_user(id, payload.role, payload.tier_id, display_name)
        .await
        .map_err(|err| {
            if err.to_string().contains("tier not found") {
                return AppError::bad_request("tier not found");
            }
            tracing::error!(error = ?err, user_id = %id, "failed to update user");
            AppError::internal("failed to update user")
        })?;

    let Some(user) = user else {
        return Err(AppError::not_found("user not found"));
    };
    if payload.tier_id.is_some() || payload.role.is_some() {
        feed_service(&state).invalidate(id).await;
    }

    tracing::info!(user_id = %id, admin_id = %admin.user_id, "user updated by admin");
    Ok(Json(user))
}

pub async fn admin_delete_user(
    Path(id): Path<Uuid>,
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    if admin.user_id == id {
        return Err(AppError::bad_request("cannot delete your own account"));
    }

    let keys = UserService::new(state.db.clone())
        .delete_user(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %id, "failed to delete user");
            AppError::internal("failed to delete user")
        })?;

    let Some(keys) = keys else {
        return Err(AppError::not_found("user not found"));
    };
    media_service(&state).delete_objects(&keys).await;
    feed_service(&state).invalidate_posts().await;

    tracing::info!(user_id = %id, admin_id = %admin.user_id, removed_objects = keys.len(), "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateStoryRequest {
    pub slug: Option<String>,
    pub title: String,
    pub synopsis: Option<String>,
    pub cover_key: Option<String>,
    pub required_tier_id: Option<Uuid>,
    #[serde(default)]
    pub published: bool,
}

fn story_error(err: anyhow::Error, action: &'static str) -> AppError {
    if unique_violation(&err).is_some() {
        return AppError::conflict("slug already taken");
    }
    let message = err.to_string();
    if message.contains("invalid slug") || message.contains("tier not found") {
        return AppError::bad_request(message);
    }
    tracing::error!(error = ?err, "failed to {}", action);
    AppError::internal(format!("failed to {}", action))
}

pub async fn admin_create_story(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateStoryRequest>,
) -> Result<(StatusCode, Json<Story>), AppError> {
    let title = validate_title(&payload.title)?;

    let story = StoryService::new(state.db.clone())
        .create_story(NewStory {
            slug: payload.slug,
            title,
            synopsis: payload.synopsis,
            cover_key: payload.cover_key,
            required_tier_id: payload.required_tier_id,
            published: payload.published,
        })
        .await
        .map_err(|err| story_error(err, "create story"))?;

    Ok((StatusCode::CREATED, Json(story)))
}

#[derive(Deserialize)]
pub struct UpdateStoryRequest {
    pub slug: Option<String>,
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub synopsis: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub cover_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub required_tier_id: Option<Option<Uuid>>,
    pub published: Option<bool>,
}

pub async fn admin_update_story(
    Path(id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateStoryRequest>,
) -> Result<Json<Story>, AppError> {
    let title = payload.title.as_deref().map(validate_title).transpose()?;

    let story = StoryService::new(state.db.clone())
        .update_story(
            id,
            StoryChanges {
                slug: payload.slug,
                title,
                synopsis: payload.synopsis,
                cover_key: payload.cover_key,
                required_tier_id: payload.required_tier_id,
                published: payload.published,
            },
        )
        .await
        .map_err(|err| story_error(err, "update story"))?;

    story
        .map(Json)
        .ok_or_else(|| AppError::not_found("story not found"))
}

pub async fn admin_delete_story(
    Path(id): Path<Uuid>,
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let keys = StoryService::new(state.db.clone())
        .delete_story(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, story_id = %id, "failed to delete story");
            AppError::internal("failed to delete story")
        })?;

    let Some(keys) = keys else {
        return Err(AppError::not_found("story not found"));
    };
    media_service(&state).delete_objects(&keys).await;

    tracing::info!(story_id = %id, admin_id = %admin.user_id, "story deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateChapterRequest {
    pub number: Option<i32>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub published: bool,
}

pub async fn admin_create_chapter(
    Path(story_id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateChapterRequest>,
) -> Result<(StatusCode, Json<Chapter>), AppError> {
    let title = validate_title(&payload.title)?;
    validate_chapter_body(&payload.body)?;
    if matches!(payload.number, Some(number) if number < 1) {
        return Err(AppError::bad_request("number must be at least 1"));
    }

    let chapter = StoryService::new(state.db.clone())
        .create_chapter(
            story_id,
            NewChapter {
                number: payload.number,
                title,
                body: payload.body,
                published: payload.published,
            },
        )
        .await
        .map_err(|err| {
            if unique_violation(&err).is_some() {
                return AppError::conflict("chapter number already taken");
            }
            tracing::error!(error = ?err, story_id = %story_id, "failed to create chapter");
            AppError::internal("failed to create chapter")
        })?;

    chapter
        .map(|chapter| (StatusCode::CREATED, Json(chapter)))
        .ok_or_else(|| AppError::not_found("story not found"))
}

/// Chapters are long-form prose; allow more than a post body.
fn validate_chapter_body(body: &str) -> Result<(), AppError> {
    if body.chars().count() > MAX_BODY_LEN * 10 {
        return Err(AppError::bad_request("chapter body is too long"));
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct UpdateChapterRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub published: Option<bool>,
}

pub async fn admin_update_chapter(
    Path(id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateChapterRequest>,
) -> Result<Json<Chapter>, AppError> {
    let title = payload.title.as_deref().map(validate_title).transpose()?;
    if let Some(ref body) = payload.body {
        validate_chapter_body(body)?;
    }

    let chapter = StoryService::new(state.db.clone())
        .update_chapter(
            id,
            ChapterChanges {
                title,
                body: payload.body,
                published: payload.published,
            },
        )
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, chapter_id = %id, "failed to update chapter");
            AppError::internal("failed to update chapter")
        })?;

    chapter
        .map(Json)
        .ok_or_else(|| AppError::not_found("chapter not found"))
}

pub async fn admin_delete_chapter(
    Path(id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let deleted = StoryService::new(state.db.clone())
        .delete_chapter(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, chapter_id = %id, "failed to delete chapter");
            AppError::internal("failed to delete chapter")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("chapter not found"))
    }
}

#[derive(Deserialize)]
pub struct ReorderChaptersRequest {
    pub chapter_ids: Vec<Uuid>,
}

pub async fn admin_reorder_chapters(
    Path(story_id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<ReorderChaptersRequest>,
) -> Result<Json<Vec<ChapterSummary>>, AppError> {
    let chapters = StoryService::new(state.db.clone())
        .reorder_chapters(story_id, &payload.chapter_ids)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.contains("chapter order") {
                return AppError::bad_request(message);
            }
            tracing::error!(error = ?err, story_id = %story_id, "failed to reorder chapters");
            AppError::internal("failed to reorder chapters")
        })?;

    chapters
        .map(Json)
        .ok_or_else(|| AppError::not_found("story not found"))
}

#[derive(Deserialize)]
pub struct AddGalleryItemRequest {
    pub chapter_id: Option<Uuid>,
    pub storage_key: String,
    pub content_type: String,
    pub caption: Option<String>,
}

pub async fn admin_add_gallery_item(
    Path(story_id): Path<Uuid>,
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(payload): Json<AddGalleryItemRequest>,
) -> Result<(StatusCode, Json<GalleryItem>), AppError> {
    if !is_owned_upload_key(admin.user_id, &payload.storage_key) {
        return Err(AppError::bad_request("storage_key must be one of your uploads"));
    }
    let kind = supported_kind(&payload.content_type)
        .ok_or_else(|| AppError::bad_request("unsupported content type"))?;
    let caption = payload
        .caption
        .map(|caption| caption.trim().to_string())
        .filter(|caption| !caption.is_empty());
    if caption
        .as_ref()
        .map(|caption| caption.chars().count() > MAX_CAPTION_LEN)
        .unwrap_or(false)
    {
        return Err(AppError::bad_request("caption must be at most 500 characters"));
    }

    let item = GalleryService::new(state.db.clone(), state.fallback.clone())
        .add_item(
            story_id,
            NewGalleryItem {
                chapter_id: payload.chapter_id,
                kind,
                storage_key: payload.storage_key,
                caption,
            },
        )
        .await
        .map_err(|err| {
            if err.to_string().contains("chapter not in story") {
                return AppError::bad_request("chapter does not belong to this story");
            }
            tracing::error!(error = ?err, story_id = %story_id, "failed to add gallery item");
            AppError::internal("failed to add gallery item")
        })?;

    let Some(mut item) = item else {
        return Err(AppError::not_found("story not found"));
    };
    item.url = media_service(&state)
        .presign_get(&item.storage_key, state.media_url_ttl_seconds)
        .await;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn admin_remove_gallery_item(
    Path(id): Path<Uuid>,
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let removed = GalleryService::new(state.db.clone(), state.fallback.clone())
        .remove_item(id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, item_id = %id, "failed to remove gallery item");
            AppError::internal("failed to remove gallery item")
        })?;

    let Some(item) = removed else {
        return Err(AppError::not_found("gallery item not found"));
    };
    media_service(&state)
        .delete_objects(&[item.storage_key])
        .await;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips_and_rejects_garbage() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let id = Uuid::new_v4();
        let encoded = encode_cursor(Some((at, id))).unwrap();
        assert_eq!(parse_cursor(Some(encoded)).unwrap(), Some((at, id)));
        assert!(parse_cursor(Some("yesterday/abc".into())).is_err());
        assert!(parse_cursor(Some("no-slash".into())).is_err());
        assert_eq!(parse_cursor(None).unwrap(), None);
    }

    #[test]
    fn page_limit_defaults_and_bounds() {
        assert_eq!(page_limit(None).unwrap(), DEFAULT_PAGE_SIZE);
        assert_eq!(page_limit(Some(100)).unwrap(), 100);
        assert!(page_limit(Some(0)).is_err());
        assert!(page_limit(Some(101)).is_err());
    }

    #[test]
    fn split_page_points_cursor_at_last_kept_item() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let rows: Vec<(OffsetDateTime, Uuid)> = (0..4).map(|_| (at, Uuid::new_v4())).collect();
        let (items, next) = split_page(rows.clone(), 3, |row| *row);
        assert_eq!(items.len(), 3);
        assert_eq!(next, encode_cursor(Some(rows[2])));

        let (items, next) = split_page(rows, 10, |row| *row);
        assert_eq!(items.len(), 4);
        assert!(next.is_none());
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        price_cents: Option<Option<i64>>,
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.price_cents, None);
        let cleared: Patch = serde_json::from_str(r#"{"price_cents": null}"#).unwrap();
        assert_eq!(cleared.price_cents, Some(None));
        let set: Patch = serde_json::from_str(r#"{"price_cents": 250}"#).unwrap();
        assert_eq!(set.price_cents, Some(Some(250)));
    }
}
