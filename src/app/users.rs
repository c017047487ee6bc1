use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::tiers::TierService;
use crate::domain::user::{Role, User};
use crate::infra::db::Db;

/// Column list for `users u JOIN tiers t`.
pub(crate) const USER_COLUMNS: &str = "u.id, u.email, u.username, u.display_name, u.role, \
     u.tier_id, t.name AS tier_name, t.rank AS tier_rank, u.created_at";

pub(crate) fn row_to_user(row: &PgRow) -> Result<User> {
    let role: String = row.get("role");
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown role: {}", role))?;
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        username: row.get("username"),
        display_name: row.get("display_name"),
        role,
        tier_id: row.get("tier_id"),
        tier_name: row.get("tier_name"),
        tier_rank: row.get("tier_rank"),
        created_at: row.get("created_at"),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TierCount {
    pub tier: String,
    pub rank: i32,
    pub users: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub users: i64,
    pub users_by_tier: Vec<TierCount>,
    pub posts: i64,
    pub stories: i64,
    pub chapters: i64,
    pub purchases: i64,
    pub revenue_cents: i64,
}

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users u JOIN tiers t ON t.id = u.tier_id WHERE u.id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| row_to_user(&row)).transpose()
    }

    /// Newest accounts first. `search` matches username, display name or email.
    pub async fn list_users(
        &self,
        search: Option<&str>,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<User>> {
        let pattern = search.map(|term| format!("%{}%", escape_like(term)));
        let (cursor_at, cursor_id) = match cursor {
            Some((created_at, id)) => (Some(created_at), Some(id)),
            None => (None, None),
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM users u JOIN tiers t ON t.id = u.tier_id \
             WHERE ($1::text IS NULL \
                    OR u.username ILIKE $1 OR u.display_name ILIKE $1 OR u.email ILIKE $1) \
               AND ($2::timestamptz IS NULL \
                    OR u.created_at < $2 OR (u.created_at = $2 AND u.id < $3)) \
             ORDER BY u.created_at DESC, u.id DESC \
             LIMIT $4",
            USER_COLUMNS
        ))
        .bind(pattern)
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(row_to_user).collect()
    }

    /// Admin edit. Absent fields keep their value; an unknown tier id is an error.
    pub async fn update_user(
        &self,
        user_id: Uuid,
        role: Option<Role>,
        tier_id: Option<Uuid>,
        display_name: Option<String>,
    ) -> Result<Option<User>> {
        if let Some(tier_id) = tier_id {
            if !TierService::new(self.db.clone()).exists(tier_id).await? {
                return Err(anyhow!("tier not found"));
            }
        }

        let row = sqlx::query(&format!(
            "WITH updated AS ( \
                UPDATE users \
                SET role = COALESCE($2, role), \
                    tier_id = COALESCE($3, tier_id), \
                    display_name = COALESCE($4, display_name) \
                WHERE id = $1 \
                RETURNING * \
             ) \
             SELECT {} FROM updated u JOIN tiers t ON t.id = u.tier_id",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(role.map(|role| role.as_db()))
        .bind(tier_id)
        .bind(display_name)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| row_to_user(&row)).transpose()
    }

    /// Posts, likes, comments, purchases, follows and tokens go with the row
    /// (ON DELETE CASCADE). Returns the storage keys of the user's post assets
    /// so the objects can be removed, or `None` when there was no such user.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<Option<Vec<String>>> {
        let mut tx = self.db.pool().begin().await?;

        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT a.storage_key FROM post_assets a \
             JOIN posts p ON p.id = a.post_id \
             WHERE p.creator_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(keys))
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let totals = sqlx::query(
            "SELECT \
                (SELECT COUNT(*) FROM users) AS users, \
                (SELECT COUNT(*) FROM posts) AS posts, \
                (SELECT COUNT(*) FROM stories) AS stories, \
                (SELECT COUNT(*) FROM chapters) AS chapters, \
                (SELECT COUNT(*) FROM purchases) AS purchases, \
                (SELECT COALESCE(SUM(amount_cents), 0)::bigint FROM purchases) AS revenue_cents",
        )
        .fetch_one(self.db.pool())
        .await?;

        let tier_rows = sqlx::query(
            "SELECT t.name, t.rank, COUNT(u.id) AS users \
             FROM tiers t LEFT JOIN users u ON u.tier_id = t.id \
             GROUP BY t.id, t.name, t.rank \
             ORDER BY t.rank ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        let users_by_tier = tier_rows
            .into_iter()
            .map(|row| TierCount {
                tier: row.get("name"),
                rank: row.get("rank"),
                users: row.get("users"),
            })
            .collect();

        Ok(DashboardStats {
            users: totals.get("users"),
            users_by_tier,
            posts: totals.get("posts"),
            stories: totals.get("stories"),
            chapters: totals.get("chapters"),
            purchases: totals.get("purchases"),
            revenue_cents: totals.get("revenue_cents"),
        })
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
