use anyhow::Result;
use sqlx::Row;
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::posts::PostService;
use crate::domain::engagement::Purchase;
use crate::infra::db::Db;
use crate::infra::devstore::{fallback_to, DevStore, DevTable};

#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub purchase: Purchase,
    /// False when the viewer already owned the post.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub enum PurchaseResult {
    PostNotFound,
    /// Free posts cannot be bought.
    Free,
    Purchased(PurchaseOutcome),
}

#[derive(Clone)]
pub struct PurchaseService {
    db: Db,
    fallback: Option<DevStore>,
}

impl PurchaseService {
    pub fn new(db: Db, fallback: Option<DevStore>) -> Self {
        Self { db, fallback }
    }

    /// Records an entitlement at the post's current price. Repeat purchases
    /// return the original row with `created = false`.
    ///
    /// On the dev fallback the price cannot be looked up, so the purchase is
    /// recorded with `amount_cents = 0`.
    pub async fn purchase(&self, user_id: Uuid, post_id: Uuid) -> Result<PurchaseResult> {
        let err = match self.purchase_db(user_id, post_id).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };
        let store = fallback_to(self.fallback.as_ref(), err, "purchase")?;

        let outcome = store
            .update(DevTable::Purchases, |purchases: &mut Vec<Purchase>| {
                if let Some(existing) = purchases
                    .iter()
                    .find(|purchase| purchase.user_id == user_id && purchase.post_id == post_id)
                {
                    return PurchaseOutcome {
                        purchase: existing.clone(),
                        created: false,
                    };
                }
                let purchase = Purchase {
                    id: Uuid::new_v4(),
                    user_id,
                    post_id,
                    amount_cents: 0,
                    created_at: OffsetDateTime::now_utc(),
                };
                purchases.push(purchase.clone());
                PurchaseOutcome {
                    purchase,
                    created: true,
                }
            })
            .await?;
        Ok(PurchaseResult::Purchased(outcome))
    }

    async fn purchase_db(&self, user_id: Uuid, post_id: Uuid) -> Result<PurchaseResult> {
        let amount_cents = match PostService::new(self.db.clone()).price_of(post_id).await? {
            None => return Ok(PurchaseResult::PostNotFound),
            Some(Some(price)) if price > 0 => price,
            Some(_) => return Ok(PurchaseResult::Free),
        };

        let inserted = sqlx::query(
            "INSERT INTO purchases (user_id, post_id, amount_cents) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, post_id) DO NOTHING \
             RETURNING id, user_id, post_id, amount_cents, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(amount_cents)
        .fetch_optional(self.db.pool())
        .await?;

        let (row, created) = match inserted {
            Some(row) => (row, true),
            None => {
                let row = sqlx::query(
                    "SELECT id, user_id, post_id, amount_cents, created_at \
                     FROM purchases WHERE user_id = $1 AND post_id = $2",
                )
                .bind(user_id)
                .bind(post_id)
                .fetch_one(self.db.pool())
                .await?;
                (row, false)
            }
        };

        if created {
            tracing::info!(user_id = %user_id, post_id = %post_id, amount_cents, "post purchased");
        }

        Ok(PurchaseResult::Purchased(PurchaseOutcome {
            purchase: Purchase {
                id: row.get("id"),
                user_id: row.get("user_id"),
                post_id: row.get("post_id"),
                amount_cents: row.get("amount_cents"),
                created_at: row.get("created_at"),
            },
            created,
        }))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Purchase>> {
        let result = sqlx::query(
            "SELECT id, user_id, post_id, amount_cents, created_at \
             FROM purchases WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await;

        let err = match result {
            Ok(rows) => {
                return Ok(rows
                    .into_iter()
                    .map(|row| Purchase {
                        id: row.get("id"),
                        user_id: row.get("user_id"),
                        post_id: row.get("post_id"),
                        amount_cents: row.get("amount_cents"),
                        created_at: row.get("created_at"),
                    })
                    .collect())
            }
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "list_purchases")?;

        let mut purchases: Vec<Purchase> = store
            .read::<Purchase>(DevTable::Purchases)
            .await?
            .into_iter()
            .filter(|purchase| purchase.user_id == user_id)
            .collect();
        purchases.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(purchases)
    }

    /// Which of `post_ids` the user owns.
    pub async fn purchased_among(&self, user_id: Uuid, post_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if post_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let result = sqlx::query_scalar::<_, Uuid>(
            "SELECT post_id FROM purchases WHERE user_id = $1 AND post_id = ANY($2)",
        )
        .bind(user_id)
        .bind(post_ids)
        .fetch_all(self.db.pool())
        .await;

        let err = match result {
            Ok(ids) => return Ok(ids.into_iter().collect()),
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "purchased_among")?;

        let wanted: HashSet<Uuid> = post_ids.iter().copied().collect();
        Ok(store
            .read::<Purchase>(DevTable::Purchases)
            .await?
            .into_iter()
            .filter(|purchase| purchase.user_id == user_id && wanted.contains(&purchase.post_id))
            .map(|purchase| purchase.post_id)
            .collect())
    }
}
