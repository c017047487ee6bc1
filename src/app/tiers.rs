use anyhow::Result;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::tier::Tier;
use crate::infra::db::Db;

#[derive(Clone)]
pub struct TierService {
    db: Db,
}

impl TierService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list_tiers(&self) -> Result<Vec<Tier>> {
        let rows = sqlx::query(
            "SELECT id, name, rank, price_cents, description FROM tiers ORDER BY rank ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Tier {
                id: row.get("id"),
                name: row.get("name"),
                rank: row.get("rank"),
                price_cents: row.get("price_cents"),
                description: row.get("description"),
            })
            .collect())
    }

    pub async fn tiers_by_id(&self) -> Result<HashMap<Uuid, Tier>> {
        let tiers = self.list_tiers().await?;
        Ok(tiers.into_iter().map(|tier| (tier.id, tier)).collect())
    }

    pub async fn exists(&self, tier_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tiers WHERE id = $1)")
            .bind(tier_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }

    /// Rank of the viewer's current tier; `None` for unknown users.
    pub async fn rank_of_user(&self, user_id: Uuid) -> Result<Option<i32>> {
        let rank: Option<i32> = sqlx::query_scalar(
            "SELECT t.rank FROM users u JOIN tiers t ON t.id = u.tier_id WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(rank)
    }
}
