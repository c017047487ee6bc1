use anyhow::{anyhow, Result};
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::social_graph::Follow;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct SocialService {
    db: Db,
}

#[derive(Debug, Clone)]
pub enum FollowOutcome {
    Followed(Follow),
    AlreadyFollowing,
}

impl SocialService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Only creators and admins can be followed. `Ok(None)` when the target
    /// user does not exist.
    pub async fn follow(&self, follower_id: Uuid, creator_id: Uuid) -> Result<Option<FollowOutcome>> {
        if follower_id == creator_id {
            return Err(anyhow!("cannot follow yourself"));
        }

        let mut tx = self.db.pool().begin().await?;

        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM users WHERE id = $1 FOR SHARE")
                .bind(creator_id)
                .fetch_optional(&mut *tx)
                .await?;

        match role.as_deref() {
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
            Some("creator") | Some("admin") => {}
            Some(_) => {
                tx.rollback().await?;
                return Err(anyhow!("user is not a creator"));
            }
        }

        let created_at = sqlx::query_scalar(
            "INSERT INTO follows (follower_id, creator_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING created_at",
        )
        .bind(follower_id)
        .bind(creator_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(match created_at {
            Some(created_at) => FollowOutcome::Followed(Follow {
                follower_id,
                creator_id,
                created_at,
            }),
            None => FollowOutcome::AlreadyFollowing,
        }))
    }

    pub async fn unfollow(&self, follower_id: Uuid, creator_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND creator_id = $2")
            .bind(follower_id)
            .bind(creator_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn followed_creator_ids(&self, follower_id: Uuid) -> Result<HashSet<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT creator_id FROM follows WHERE follower_id = $1")
                .bind(follower_id)
                .fetch_all(self.db.pool())
                .await?;

        Ok(ids.into_iter().collect())
    }
}
