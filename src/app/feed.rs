use anyhow::Result;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::app::media::MediaService;
use crate::app::posts::{PostFilter, PostService};
use crate::app::purchases::PurchaseService;
use crate::app::social::SocialService;
use crate::app::tiers::TierService;
use crate::domain::feed::{gate, FeedItem, Viewer};
use crate::domain::post::{MediaKind, MediaPost};
use crate::domain::tier::FREE_RANK;
use crate::domain::user::Role;
use crate::infra::{cache::RedisCache, db::Db, devstore::DevStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    All,
    Following,
}

impl FeedScope {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(Self::All),
            "following" => Some(Self::Following),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Following => "following",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedQuery {
    pub scope: FeedScope,
    pub creator_id: Option<Uuid>,
    pub kind: Option<MediaKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_created_at: Option<OffsetDateTime>,
    pub next_id: Option<Uuid>,
}

impl FeedPage {
    pub fn next_cursor(&self) -> Option<(OffsetDateTime, Uuid)> {
        self.next_created_at.zip(self.next_id)
    }
}

#[derive(Clone)]
pub struct FeedService {
    db: Db,
    cache: RedisCache,
    media: MediaService,
    fallback: Option<DevStore>,
    cache_ttl_seconds: u64,
    media_url_ttl_seconds: u64,
}

impl FeedService {
    pub fn new(
        db: Db,
        cache: RedisCache,
        media: MediaService,
        fallback: Option<DevStore>,
        cache_ttl_seconds: u64,
        media_url_ttl_seconds: u64,
    ) -> Self {
        Self {
            db,
            cache,
            media,
            fallback,
            cache_ttl_seconds,
            media_url_ttl_seconds,
        }
    }

    /// One gated page of posts, newest first.
    ///
    /// `viewer` is `(user_id, role)` from the access token. The follow scope
    /// needs a viewer; callers reject anonymous `following` requests.
    pub async fn get_feed(
        &self,
        viewer: Option<(Uuid, Role)>,
        query: FeedQuery,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<FeedPage> {
        let viewer_id = viewer.map(|(user_id, _)| user_id);
        let generation = self.generation(viewer_id).await;
        let cache_key = generation.map(|generation| {
            cache_key(viewer_id, generation, &query, cursor, limit)
        });

        if let Some(ref cache_key) = cache_key {
            if let Some(page) = self.read_cached(cache_key).await {
                return Ok(page);
            }
        }

        let filter = PostFilter {
            creator_id: query.creator_id,
            followed_by: match query.scope {
                FeedScope::Following => viewer_id,
                FeedScope::All => None,
            },
            kind: query.kind,
        };
        let mut posts = PostService::new(self.db.clone())
            .list_posts(&filter, cursor, limit + 1)
            .await?;

        let next = if posts.len() > limit as usize {
            posts.pop();
            posts.last().map(|post| (post.created_at, post.id))
        } else {
            None
        };

        let items = self.gate_for(viewer, posts).await?;

        let page = FeedPage {
            items,
            next_created_at: next.map(|(created_at, _)| created_at),
            next_id: next.map(|(_, id)| id),
        };

        if let Some(ref cache_key) = cache_key {
            self.write_cached(cache_key, &page).await;
        }

        Ok(page)
    }

    /// A single post as the viewer would see it in the feed.
    pub async fn view_post(
        &self,
        viewer: Option<(Uuid, Role)>,
        post_id: Uuid,
    ) -> Result<Option<FeedItem>> {
        let Some(post) = PostService::new(self.db.clone()).get_post(post_id).await? else {
            return Ok(None);
        };
        Ok(self.gate_for(viewer, vec![post]).await?.pop())
    }

    /// Resolve the viewer's rank, purchases and follows, gate, then sign the
    /// URLs of whatever stays visible.
    async fn gate_for(
        &self,
        viewer: Option<(Uuid, Role)>,
        posts: Vec<MediaPost>,
    ) -> Result<Vec<FeedItem>> {
        let tiers = TierService::new(self.db.clone());

        let mut resolved = Viewer::anonymous();
        if let Some((user_id, role)) = viewer {
            let post_ids: Vec<Uuid> = posts.iter().map(|post| post.id).collect();
            resolved = Viewer {
                user_id: Some(user_id),
                role: Some(role),
                rank: tiers.rank_of_user(user_id).await?.unwrap_or(FREE_RANK),
                purchased: PurchaseService::new(self.db.clone(), self.fallback.clone())
                    .purchased_among(user_id, &post_ids)
                    .await?,
                following: SocialService::new(self.db.clone())
                    .followed_creator_ids(user_id)
                    .await?,
            };
        }

        let tier_map = tiers.tiers_by_id().await?;
        let mut items = gate(posts, &tier_map, &resolved);
        for item in items.iter_mut().filter(|item| item.can_view) {
            self.media
                .populate_asset_urls(&mut item.assets, self.media_url_ttl_seconds)
                .await;
        }
        Ok(items)
    }

    /// Drops every cached page for the viewer by bumping their generation.
    pub async fn invalidate(&self, viewer_id: Uuid) {
        self.bump(&generation_key(Some(viewer_id))).await;
    }

    /// Drops every viewer's cached pages. Used when a post is created,
    /// edited or removed, since that changes pages for everyone.
    pub async fn invalidate_posts(&self) {
        self.bump(POSTS_GENERATION_KEY).await;
    }

    async fn bump(&self, key: &str) {
        if self.cache_ttl_seconds == 0 {
            return;
        }
        match self.cache.client().get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                if let Err(err) = conn.incr::<_, _, i64>(key, 1).await {
                    warn!(error = ?err, key = %key, "failed to invalidate feed cache");
                }
            }
            Err(err) => warn!(error = ?err, key = %key, "failed to invalidate feed cache"),
        }
    }

    /// `(viewer, posts)` generations. `None` when caching is off or Redis is
    /// unreachable.
    async fn generation(&self, viewer_id: Option<Uuid>) -> Option<(i64, i64)> {
        if self.cache_ttl_seconds == 0 {
            return None;
        }
        let mut conn = self.cache.client().get_multiplexed_async_connection().await.ok()?;
        let generations: Vec<Option<i64>> = conn
            .mget(vec![generation_key(viewer_id), POSTS_GENERATION_KEY.to_string()])
            .await
            .ok()?;
        let viewer = generations.first().copied().flatten().unwrap_or(0);
        let posts = generations.get(1).copied().flatten().unwrap_or(0);
        Some((viewer, posts))
    }

    async fn read_cached(&self, cache_key: &str) -> Option<FeedPage> {
        let mut conn = self.cache.client().get_multiplexed_async_connection().await.ok()?;
        let payload: Option<String> = conn.get(cache_key).await.ok()?;
        serde_json::from_str(&payload?).ok()
    }

    async fn write_cached(&self, cache_key: &str, page: &FeedPage) {
        let Ok(mut conn) = self.cache.client().get_multiplexed_async_connection().await else {
            return;
        };
        if let Ok(payload) = serde_json::to_string(page) {
            if let Err(err) = conn
                .set_ex::<_, _, ()>(cache_key, payload, self.cache_ttl_seconds)
                .await
            {
                warn!(error = ?err, "failed to write feed cache");
            }
        }
    }
}

const POSTS_GENERATION_KEY: &str = "feed:gen:posts";

fn generation_key(viewer_id: Option<Uuid>) -> String {
    match viewer_id {
        Some(viewer_id) => format!("feed:gen:{}", viewer_id),
        None => "feed:gen:anon".to_string(),
    }
}

fn cache_key(
    viewer_id: Option<Uuid>,
    generation: (i64, i64),
    query: &FeedQuery,
    cursor: Option<(OffsetDateTime, Uuid)>,
    limit: i64,
) -> String {
    let viewer = viewer_id.map_or_else(|| "anon".to_string(), |id| id.to_string());
    let creator = query.creator_id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let kind = query.kind.map_or("-", |kind| kind.as_db());
    let cursor = match cursor {
        Some((created_at, id)) => format!("{}:{}", created_at.unix_timestamp_nanos(), id),
        None => "head".to_string(),
    };
    format!(
        "feed:v2:{}:{}.{}:{}:{}:{}:{}:{}",
        viewer,
        generation.0,
        generation.1,
        query.scope.as_str(),
        creator,
        kind,
        limit,
        cursor
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_known_values_only() {
        assert_eq!(FeedScope::parse("all"), Some(FeedScope::All));
        assert_eq!(FeedScope::parse("following"), Some(FeedScope::Following));
        assert_eq!(FeedScope::parse("friends"), None);
    }

    #[test]
    fn cache_keys_separate_viewers_filters_and_generations() {
        let viewer = Uuid::new_v4();
        let all = FeedQuery {
            scope: FeedScope::All,
            creator_id: None,
            kind: None,
        };
        let videos = FeedQuery {
            kind: Some(MediaKind::Video),
            ..all
        };

        let base = cache_key(Some(viewer), (0, 0), &all, None, 20);
        assert_ne!(base, cache_key(None, (0, 0), &all, None, 20));
        assert_ne!(base, cache_key(Some(viewer), (1, 0), &all, None, 20));
        assert_ne!(base, cache_key(Some(viewer), (0, 1), &all, None, 20));
        assert_ne!(base, cache_key(Some(viewer), (0, 0), &videos, None, 20));
        assert_ne!(
            base,
            cache_key(
                Some(viewer),
                (0, 0),
                &all,
                Some((OffsetDateTime::now_utc(), Uuid::new_v4())),
                20
            )
        );
        assert_eq!(base, cache_key(Some(viewer), (0, 0), &all, None, 20));
    }
}
