//! Per-viewer visibility for media posts.
//!
//! The feed service gathers everything with a handful of queries and hands
//! it here; nothing in this module touches the database.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::{MediaAsset, MediaPost};
use crate::domain::tier::{Tier, FREE_RANK};
use crate::domain::user::Role;

#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: Option<Uuid>,
    pub role: Option<Role>,
    pub rank: i32,
    pub purchased: HashSet<Uuid>,
    pub following: HashSet<Uuid>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self {
            rank: FREE_RANK,
            ..Self::default()
        }
    }

    fn is_admin(&self) -> bool {
        self.role.map(|role| role.is_admin()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Purchase,
    Tier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredTier {
    pub id: Uuid,
    pub name: String,
    pub rank: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub creator_username: Option<String>,
    pub creator_display_name: Option<String>,
    pub title: String,
    /// `None` while locked.
    pub body: Option<String>,
    pub price_cents: Option<i64>,
    pub required_tier: Option<RequiredTier>,
    pub can_view: bool,
    pub locked_reason: Option<LockReason>,
    pub purchased: bool,
    pub is_following: bool,
    pub asset_count: usize,
    /// Empty while locked.
    pub assets: Vec<MediaAsset>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Decide what the viewer may see of one post.
pub fn access(post: &MediaPost, required_rank: i32, viewer: &Viewer) -> Option<LockReason> {
    let is_creator = viewer.user_id == Some(post.creator_id);
    if is_creator || viewer.is_admin() || viewer.purchased.contains(&post.id) {
        return None;
    }
    if post.is_priced() {
        return Some(LockReason::Purchase);
    }
    if required_rank > viewer.rank {
        return Some(LockReason::Tier);
    }
    None
}

/// Gate a page of posts for one viewer, keeping input order.
///
/// `tiers` maps tier id to tier; a post whose required tier is missing from
/// the map is treated as requiring a rank nobody has, so it stays locked.
pub fn gate(posts: Vec<MediaPost>, tiers: &HashMap<Uuid, Tier>, viewer: &Viewer) -> Vec<FeedItem> {
    posts
        .into_iter()
        .map(|post| {
            let required_tier = post.required_tier_id.map(|tier_id| match tiers.get(&tier_id) {
                Some(tier) => RequiredTier {
                    id: tier.id,
                    name: tier.name.clone(),
                    rank: tier.rank,
                },
                None => RequiredTier {
                    id: tier_id,
                    name: "unknown".to_string(),
                    rank: i32::MAX,
                },
            });
            let required_rank = required_tier.as_ref().map(|tier| tier.rank).unwrap_or(FREE_RANK);
            let locked_reason = access(&post, required_rank, viewer);
            let can_view = locked_reason.is_none();

            FeedItem {
                id: post.id,
                creator_id: post.creator_id,
                creator_username: post.creator_username,
                creator_display_name: post.creator_display_name,
                title: post.title,
                body: can_view.then_some(post.body),
                price_cents: post.price_cents,
                required_tier,
                can_view,
                locked_reason,
                purchased: viewer.purchased.contains(&post.id),
                is_following: viewer.following.contains(&post.creator_id),
                asset_count: post.assets.len(),
                assets: if can_view { post.assets } else { Vec::new() },
                created_at: post.created_at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::post::MediaKind;

    struct Fixture {
        tiers: HashMap<Uuid, Tier>,
        silver: Uuid,
        gold: Uuid,
        creator: Uuid,
    }

    fn fixture() -> Fixture {
        let mut tiers = HashMap::new();
        let mut add = |name: &str, rank: i32| {
            let id = Uuid::new_v4();
            tiers.insert(
                id,
                Tier {
                    id,
                    name: name.to_string(),
                    rank,
                    price_cents: i64::from(rank) * 500,
                    description: None,
                },
            );
            id
        };
        add("Free", 0);
        let silver = add("Silver", 1);
        let gold = add("Gold", 2);
        Fixture {
            tiers,
            silver,
            gold,
            creator: Uuid::new_v4(),
        }
    }

    fn post(creator: Uuid, price: Option<i64>, tier: Option<Uuid>) -> MediaPost {
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        MediaPost {
            id,
            creator_id: creator,
            creator_username: Some("bambi".into()),
            creator_display_name: Some("Bambi".into()),
            title: "title".into(),
            body: "secret body".into(),
            price_cents: price,
            required_tier_id: tier,
            assets: vec![MediaAsset {
                id: Uuid::new_v4(),
                post_id: id,
                kind: MediaKind::Image,
                storage_key: format!("uploads/{}/a.jpg", creator),
                content_type: "image/jpeg".into(),
                width: Some(10),
                height: Some(10),
                position: 0,
                url: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    fn member(rank: i32) -> Viewer {
        Viewer {
            user_id: Some(Uuid::new_v4()),
            role: Some(Role::Member),
            rank,
            ..Viewer::default()
        }
    }

    #[test]
    fn free_posts_are_open_to_anonymous_viewers() {
        let fx = fixture();
        let items = gate(vec![post(fx.creator, None, None)], &fx.tiers, &Viewer::anonymous());
        assert!(items[0].can_view);
        assert_eq!(items[0].body.as_deref(), Some("secret body"));
        assert_eq!(items[0].assets.len(), 1);
    }

    #[test]
    fn tier_gate_compares_ranks() {
        let fx = fixture();
        let posts = vec![post(fx.creator, None, Some(fx.silver)), post(fx.creator, None, Some(fx.gold))];

        let silver_member = member(1);
        let items = gate(posts, &fx.tiers, &silver_member);
        assert!(items[0].can_view);
        assert!(!items[1].can_view);
        assert_eq!(items[1].locked_reason, Some(LockReason::Tier));
        assert_eq!(items[1].body, None);
        assert!(items[1].assets.is_empty());
        assert_eq!(items[1].asset_count, 1);
        assert_eq!(items[1].required_tier.as_ref().unwrap().name, "Gold");
    }

    #[test]
    fn priced_posts_need_a_purchase_even_for_top_tier() {
        let fx = fixture();
        let priced = post(fx.creator, Some(499), None);
        let priced_id = priced.id;

        let gold_member = member(2);
        let items = gate(vec![priced.clone()], &fx.tiers, &gold_member);
        assert_eq!(items[0].locked_reason, Some(LockReason::Purchase));

        let mut buyer = member(0);
        buyer.purchased.insert(priced_id);
        let items = gate(vec![priced], &fx.tiers, &buyer);
        assert!(items[0].can_view);
        assert!(items[0].purchased);
    }

    #[test]
    fn purchase_unlocks_a_tier_gated_post() {
        let fx = fixture();
        let gated = post(fx.creator, Some(200), Some(fx.gold));
        let mut buyer = member(0);
        buyer.purchased.insert(gated.id);
        assert!(gate(vec![gated], &fx.tiers, &buyer)[0].can_view);
    }

    #[test]
    fn zero_price_is_free() {
        let fx = fixture();
        let items = gate(vec![post(fx.creator, Some(0), None)], &fx.tiers, &member(0));
        assert!(items[0].can_view);
    }

    #[test]
    fn creators_and_admins_see_everything() {
        let fx = fixture();
        let posts = vec![post(fx.creator, Some(999), Some(fx.gold))];

        let creator = Viewer {
            user_id: Some(fx.creator),
            role: Some(Role::Creator),
            ..Viewer::anonymous()
        };
        assert!(gate(posts.clone(), &fx.tiers, &creator)[0].can_view);

        let admin = Viewer {
            user_id: Some(Uuid::new_v4()),
            role: Some(Role::Admin),
            ..Viewer::anonymous()
        };
        assert!(gate(posts, &fx.tiers, &admin)[0].can_view);
    }

    #[test]
    fn unknown_required_tier_stays_locked() {
        let fx = fixture();
        let items = gate(vec![post(fx.creator, None, Some(Uuid::new_v4()))], &fx.tiers, &member(2));
        assert_eq!(items[0].locked_reason, Some(LockReason::Tier));
    }

    #[test]
    fn following_flag_and_order_are_preserved() {
        let fx = fixture();
        let other = Uuid::new_v4();
        let posts = vec![post(other, None, None), post(fx.creator, None, None)];
        let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();

        let mut viewer = member(0);
        viewer.following.insert(fx.creator);
        let items = gate(posts, &fx.tiers, &viewer);
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), ids);
        assert!(!items[0].is_following);
        assert!(items[1].is_following);
    }
}
