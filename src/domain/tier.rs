use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rank every viewer has, signed in or not.
pub const FREE_RANK: i32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub id: Uuid,
    pub name: String,
    pub rank: i32,
    pub price_cents: i64,
    pub description: Option<String>,
}
