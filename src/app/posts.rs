use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::media::supported_kind;
use crate::domain::post::{MediaAsset, MediaKind, MediaPost};
use crate::infra::db::Db;

const POST_COLUMNS: &str = "p.id, p.creator_id, u.username AS creator_username, \
     u.display_name AS creator_display_name, p.title, p.body, p.price_cents, \
     p.required_tier_id, p.created_at, p.updated_at";

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub storage_key: String,
    pub content_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub price_cents: Option<i64>,
    pub required_tier_id: Option<Uuid>,
    pub assets: Vec<NewAsset>,
}

/// Partial update. The nested options distinguish "leave alone" from "clear".
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub price_cents: Option<Option<i64>>,
    pub required_tier_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub creator_id: Option<Uuid>,
    /// Only creators this user follows.
    pub followed_by: Option<Uuid>,
    pub kind: Option<MediaKind>,
}

#[derive(Clone)]
pub struct PostService {
    db: Db,
}

impl PostService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_post(&self, creator_id: Uuid, post: NewPost) -> Result<MediaPost> {
        let mut tx = self.db.pool().begin().await?;

        if let Some(tier_id) = post.required_tier_id {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tiers WHERE id = $1)")
                    .bind(tier_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if !exists {
                tx.rollback().await?;
                return Err(anyhow!("tier not found"));
            }
        }

        let post_id: Uuid = sqlx::query_scalar(
            "INSERT INTO posts (creator_id, title, body, price_cents, required_tier_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(creator_id)
        .bind(&post.title)
        .bind(&post.body)
        .bind(normalize_price(post.price_cents))
        .bind(post.required_tier_id)
        .fetch_one(&mut *tx)
        .await?;

        for (position, asset) in post.assets.iter().enumerate() {
            let kind = supported_kind(&asset.content_type)
                .ok_or_else(|| anyhow!("unsupported content type: {}", asset.content_type))?;
            sqlx::query(
                "INSERT INTO post_assets (post_id, kind, storage_key, content_type, width, height, position) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(post_id)
            .bind(kind.as_db())
            .bind(&asset.storage_key)
            .bind(&asset.content_type)
            .bind(asset.width)
            .bind(asset.height)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(post_id = %post_id, creator_id = %creator_id, "post created");
        self.get_post(post_id)
            .await?
            .ok_or_else(|| anyhow!("post vanished after insert"))
    }

    pub async fn get_post(&self, post_id: Uuid) -> Result<Option<MediaPost>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM posts p JOIN users u ON u.id = p.creator_id WHERE p.id = $1",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut post = row_to_post(&row);
        let mut assets = self.load_assets(&[post_id]).await?;
        post.assets = assets.remove(&post_id).unwrap_or_default();
        Ok(Some(post))
    }

    /// Price of a post: `Ok(None)` when the post does not exist.
    pub async fn price_of(&self, post_id: Uuid) -> Result<Option<Option<i64>>> {
        let row = sqlx::query("SELECT price_cents FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|row| row.get::<Option<i64>, _>("price_cents")))
    }

    pub async fn update_post(
        &self,
        post_id: Uuid,
        actor_id: Uuid,
        actor_is_admin: bool,
        changes: PostChanges,
    ) -> Result<Option<MediaPost>> {
        if let Some(Some(tier_id)) = changes.required_tier_id {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tiers WHERE id = $1)")
                    .bind(tier_id)
                    .fetch_one(self.db.pool())
                    .await?;
            if !exists {
                return Err(anyhow!("tier not found"));
            }
        }

        let updated: Option<Uuid> = sqlx::query_scalar(
            "UPDATE posts \
             SET title = COALESCE($3, title), \
                 body = COALESCE($4, body), \
                 price_cents = CASE WHEN $5 THEN $6 ELSE price_cents END, \
                 required_tier_id = CASE WHEN $7 THEN $8 ELSE required_tier_id END, \
                 updated_at = now() \
             WHERE id = $1 AND (creator_id = $2 OR $9) \
             RETURNING id",
        )
        .bind(post_id)
        .bind(actor_id)
        .bind(changes.title)
        .bind(changes.body)
        .bind(changes.price_cents.is_some())
        .bind(changes.price_cents.and_then(normalize_price))
        .bind(changes.required_tier_id.is_some())
        .bind(changes.required_tier_id.flatten())
        .bind(actor_is_admin)
        .fetch_optional(self.db.pool())
        .await?;

        match updated {
            Some(_) => self.get_post(post_id).await,
            None => Ok(None),
        }
    }

    /// Deletes the post and returns the storage keys its assets used.
    pub async fn delete_post(
        &self,
        post_id: Uuid,
        actor_id: Uuid,
        actor_is_admin: bool,
    ) -> Result<Option<Vec<String>>> {
        let mut tx = self.db.pool().begin().await?;

        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT a.storage_key FROM post_assets a \
             JOIN posts p ON p.id = a.post_id \
             WHERE p.id = $1 AND (p.creator_id = $2 OR $3)",
        )
        .bind(post_id)
        .bind(actor_id)
        .bind(actor_is_admin)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND (creator_id = $2 OR $3)")
            .bind(post_id)
            .bind(actor_id)
            .bind(actor_is_admin)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(keys))
    }

    /// Newest first, keyset-paginated on `(created_at, id)`.
    pub async fn list_posts(
        &self,
        filter: &PostFilter,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<MediaPost>> {
        let (cursor_at, cursor_id) = match cursor {
            Some((created_at, id)) => (Some(created_at), Some(id)),
            None => (None, None),
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM posts p JOIN users u ON u.id = p.creator_id \
             WHERE ($1::uuid IS NULL OR p.creator_id = $1) \
               AND ($2::uuid IS NULL OR p.creator_id IN ( \
                    SELECT creator_id FROM follows WHERE follower_id = $2)) \
               AND ($3::text IS NULL OR EXISTS ( \
                    SELECT 1 FROM post_assets a WHERE a.post_id = p.id AND a.kind = $3)) \
               AND ($4::timestamptz IS NULL \
                    OR p.created_at < $4 OR (p.created_at = $4 AND p.id < $5)) \
             ORDER BY p.created_at DESC, p.id DESC \
             LIMIT $6",
            POST_COLUMNS
        ))
        .bind(filter.creator_id)
        .bind(filter.followed_by)
        .bind(filter.kind.map(|kind| kind.as_db()))
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        let mut posts: Vec<MediaPost> = rows.iter().map(row_to_post).collect();
        let ids: Vec<Uuid> = posts.iter().map(|post| post.id).collect();
        let mut assets = self.load_assets(&ids).await?;
        for post in &mut posts {
            post.assets = assets.remove(&post.id).unwrap_or_default();
        }

        Ok(posts)
    }

    async fn load_assets(&self, post_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<MediaAsset>>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT id, post_id, kind, storage_key, content_type, width, height, position \
             FROM post_assets \
             WHERE post_id = ANY($1) \
             ORDER BY post_id, position ASC",
        )
        .bind(post_ids)
        .fetch_all(self.db.pool())
        .await?;

        let mut by_post: HashMap<Uuid, Vec<MediaAsset>> = HashMap::new();
        for row in rows {
            let kind: String = row.get("kind");
            let kind = MediaKind::from_db(&kind)
                .ok_or_else(|| anyhow!("unknown media kind: {}", kind))?;
            let asset = MediaAsset {
                id: row.get("id"),
                post_id: row.get("post_id"),
                kind,
                storage_key: row.get("storage_key"),
                content_type: row.get("content_type"),
                width: row.get("width"),
                height: row.get("height"),
                position: row.get("position"),
                url: None,
            };
            by_post.entry(asset.post_id).or_default().push(asset);
        }

        Ok(by_post)
    }
}

fn row_to_post(row: &PgRow) -> MediaPost {
    MediaPost {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        creator_username: row.get("creator_username"),
        creator_display_name: row.get("creator_display_name"),
        title: row.get("title"),
        body: row.get("body"),
        price_cents: row.get("price_cents"),
        required_tier_id: row.get("required_tier_id"),
        assets: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Zero means free and is stored as no price.
fn normalize_price(price_cents: Option<i64>) -> Option<i64> {
    price_cents.filter(|price| *price > 0)
}
