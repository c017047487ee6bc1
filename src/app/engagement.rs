use anyhow::Result;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, EngagementStats, Like};
use crate::infra::db::Db;
use crate::infra::devstore::{fallback_to, page_desc, DevStore, DevTable};

#[derive(Clone)]
pub struct EngagementService {
    db: Db,
    fallback: Option<DevStore>,
}

impl EngagementService {
    pub fn new(db: Db, fallback: Option<DevStore>) -> Self {
        Self { db, fallback }
    }

    /// `None` when the like already existed.
    pub async fn like_post(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<Like>> {
        let err = match self.like_post_db(user_id, post_id).await {
            Ok(like) => return Ok(like),
            Err(err) => err,
        };
        let store = fallback_to(self.fallback.as_ref(), err, "like_post")?;

        store
            .update(DevTable::Likes, |likes: &mut Vec<Like>| {
                if likes
                    .iter()
                    .any(|like| like.user_id == user_id && like.post_id == post_id)
                {
                    return None;
                }
                let like = Like {
                    id: Uuid::new_v4(),
                    user_id,
                    post_id,
                    created_at: OffsetDateTime::now_utc(),
                };
                likes.push(like.clone());
                Some(like)
            })
            .await
    }

    async fn like_post_db(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<Like>> {
        let row = sqlx::query(
            "INSERT INTO likes (user_id, post_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING id, user_id, post_id, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| Like {
            id: row.get("id"),
            user_id: row.get("user_id"),
            post_id: row.get("post_id"),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn unlike_post(&self, user_id: Uuid, post_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(self.db.pool())
            .await;

        let err = match result {
            Ok(result) => return Ok(result.rows_affected() > 0),
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "unlike_post")?;

        store
            .update(DevTable::Likes, |likes: &mut Vec<Like>| {
                let before = likes.len();
                likes.retain(|like| !(like.user_id == user_id && like.post_id == post_id));
                likes.len() != before
            })
            .await
    }

    pub async fn comment_post(&self, user_id: Uuid, post_id: Uuid, body: String) -> Result<Comment> {
        let result = sqlx::query(
            "WITH inserted AS ( \
                INSERT INTO comments (user_id, post_id, body) VALUES ($1, $2, $3) \
                RETURNING id, user_id, post_id, body, created_at \
             ) \
             SELECT c.*, u.username FROM inserted c JOIN users u ON u.id = c.user_id",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(&body)
        .fetch_one(self.db.pool())
        .await;

        let err = match result {
            Ok(row) => {
                return Ok(Comment {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    post_id: row.get("post_id"),
                    username: row.get("username"),
                    body: row.get("body"),
                    created_at: row.get("created_at"),
                })
            }
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "comment_post")?;

        let comment = Comment {
            id: Uuid::new_v4(),
            user_id,
            post_id,
            username: None,
            body,
            created_at: OffsetDateTime::now_utc(),
        };
        let stored = comment.clone();
        store
            .update(DevTable::Comments, move |comments: &mut Vec<Comment>| {
                comments.push(stored);
            })
            .await?;
        Ok(comment)
    }

    pub async fn list_comments(
        &self,
        post_id: Uuid,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Comment>> {
        let (cursor_at, cursor_id) = match cursor {
            Some((created_at, id)) => (Some(created_at), Some(id)),
            None => (None, None),
        };
        let result = sqlx::query(
            "SELECT c.id, c.user_id, c.post_id, u.username, c.body, c.created_at \
             FROM comments c \
             JOIN users u ON u.id = c.user_id \
             WHERE c.post_id = $1 \
               AND ($2::timestamptz IS NULL \
                    OR c.created_at < $2 OR (c.created_at = $2 AND c.id < $3)) \
             ORDER BY c.created_at DESC, c.id DESC \
             LIMIT $4",
        )
        .bind(post_id)
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await;

        let err = match result {
            Ok(rows) => {
                return Ok(rows
                    .into_iter()
                    .map(|row| Comment {
                        id: row.get("id"),
                        user_id: row.get("user_id"),
                        post_id: row.get("post_id"),
                        username: row.get("username"),
                        body: row.get("body"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "list_comments")?;

        let mut comments: Vec<Comment> = store
            .read::<Comment>(DevTable::Comments)
            .await?
            .into_iter()
            .filter(|comment| comment.post_id == post_id)
            .collect();
        comments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(page_desc(comments, cursor, limit, |comment| {
            (comment.created_at, comment.id)
        }))
    }

    /// Authors delete their own comments; admins delete any.
    pub async fn delete_comment(
        &self,
        comment_id: Uuid,
        post_id: Uuid,
        actor_id: Uuid,
        actor_is_admin: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM comments WHERE id = $1 AND post_id = $2 AND (user_id = $3 OR $4)",
        )
        .bind(comment_id)
        .bind(post_id)
        .bind(actor_id)
        .bind(actor_is_admin)
        .execute(self.db.pool())
        .await;

        let err = match result {
            Ok(result) => return Ok(result.rows_affected() > 0),
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "delete_comment")?;

        store
            .update(DevTable::Comments, |comments: &mut Vec<Comment>| {
                let before = comments.len();
                comments.retain(|comment| {
                    !(comment.id == comment_id
                        && comment.post_id == post_id
                        && (comment.user_id == actor_id || actor_is_admin))
                });
                comments.len() != before
            })
            .await
    }

    /// Counts for the lazily loaded engagement bar under each post.
    pub async fn stats(&self, post_id: Uuid, viewer_id: Option<Uuid>) -> Result<EngagementStats> {
        let result = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM likes WHERE post_id = $1) AS likes, \
                (SELECT COUNT(*) FROM comments WHERE post_id = $1) AS comments, \
                EXISTS(SELECT 1 FROM likes WHERE post_id = $1 AND user_id = $2) AS liked",
        )
        .bind(post_id)
        .bind(viewer_id)
        .fetch_one(self.db.pool())
        .await;

        let err = match result {
            Ok(row) => {
                return Ok(EngagementStats {
                    post_id,
                    likes: row.get("likes"),
                    comments: row.get("comments"),
                    liked: row.get("liked"),
                })
            }
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "engagement_stats")?;

        let likes: Vec<Like> = store.read(DevTable::Likes).await?;
        let comments: Vec<Comment> = store.read(DevTable::Comments).await?;
        let post_likes: Vec<&Like> = likes.iter().filter(|like| like.post_id == post_id).collect();
        Ok(EngagementStats {
            post_id,
            likes: post_likes.len() as i64,
            comments: comments
                .iter()
                .filter(|comment| comment.post_id == post_id)
                .count() as i64,
            liked: viewer_id
                .map(|viewer| post_likes.iter().any(|like| like.user_id == viewer))
                .unwrap_or(false),
        })
    }
}
