use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::HashSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::tiers::TierService;
use crate::domain::story::{is_valid_slug, slugify, Chapter, ChapterSummary, Story};
use crate::domain::tier::FREE_RANK;
use crate::domain::user::Role;
use crate::infra::db::Db;

const STORY_COLUMNS: &str = "s.id, s.slug, s.title, s.synopsis, s.cover_key, s.required_tier_id, \
     COALESCE(t.rank, 0) AS required_rank, s.published, s.created_at, s.updated_at";

const CHAPTER_COLUMNS: &str =
    "c.id, c.story_id, c.number, c.title, c.body, c.published, c.created_at, c.updated_at";

#[derive(Debug, Clone)]
pub struct NewStory {
    pub slug: Option<String>,
    pub title: String,
    pub synopsis: Option<String>,
    pub cover_key: Option<String>,
    pub required_tier_id: Option<Uuid>,
    pub published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StoryChanges {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub synopsis: Option<Option<String>>,
    pub cover_key: Option<Option<String>>,
    pub required_tier_id: Option<Option<Uuid>>,
    pub published: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewChapter {
    pub number: Option<i32>,
    pub title: String,
    pub body: String,
    pub published: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryDetail {
    #[serde(flatten)]
    pub story: Story,
    pub can_read: bool,
    pub chapters: Vec<ChapterSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterView {
    pub story_id: Uuid,
    pub story_slug: String,
    pub story_title: String,
    pub chapter: Chapter,
    pub prev: Option<i32>,
    pub next: Option<i32>,
}

#[derive(Debug)]
pub enum ChapterAccess {
    NotFound,
    UpgradeRequired { required_rank: i32 },
    Readable(ChapterView),
}

#[derive(Debug, Clone, Copy)]
enum StoryKey<'a> {
    Id(Uuid),
    Slug(&'a str),
}

#[derive(Clone)]
pub struct StoryService {
    db: Db,
}

impl StoryService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list_published(
        &self,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Story>> {
        let (cursor_at, cursor_id) = match cursor {
            Some((created_at, id)) => (Some(created_at), Some(id)),
            None => (None, None),
        };

        let rows = sqlx::query(&format!(
            "SELECT {} FROM stories s LEFT JOIN tiers t ON t.id = s.required_tier_id \
             WHERE s.published \
               AND ($1::timestamptz IS NULL \
                    OR s.created_at < $1 OR (s.created_at = $1 AND s.id < $2)) \
             ORDER BY s.created_at DESC, s.id DESC \
             LIMIT $3",
            STORY_COLUMNS
        ))
        .bind(cursor_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(row_to_story).collect())
    }

    /// Story page with its table of contents. Unpublished stories and
    /// chapters only show up for admins.
    pub async fn get_by_slug(
        &self,
        slug: &str,
        viewer: Option<(Uuid, Role)>,
    ) -> Result<Option<StoryDetail>> {
        let is_admin = is_admin(viewer);
        let Some(story) = self.find_story(StoryKey::Slug(slug)).await? else {
            return Ok(None);
        };
        if !story.published && !is_admin {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT id, number, title, published FROM chapters \
             WHERE story_id = $1 AND (published OR $2) \
             ORDER BY number ASC",
        )
        .bind(story.id)
        .bind(is_admin)
        .fetch_all(self.db.pool())
        .await?;

        let chapters = rows
            .into_iter()
            .map(|row| ChapterSummary {
                id: row.get("id"),
                number: row.get("number"),
                title: row.get("title"),
                published: row.get("published"),
            })
            .collect();

        let rank = self.viewer_rank(viewer).await?;
        Ok(Some(StoryDetail {
            can_read: is_admin || rank >= story.required_rank,
            story,
            chapters,
        }))
    }

    pub async fn read_chapter(
        &self,
        slug: &str,
        number: i32,
        viewer: Option<(Uuid, Role)>,
    ) -> Result<ChapterAccess> {
        let is_admin = is_admin(viewer);
        let Some(story) = self.find_story(StoryKey::Slug(slug)).await? else {
            return Ok(ChapterAccess::NotFound);
        };
        if !story.published && !is_admin {
            return Ok(ChapterAccess::NotFound);
        }

        if !is_admin && self.viewer_rank(viewer).await? < story.required_rank {
            return Ok(ChapterAccess::UpgradeRequired {
                required_rank: story.required_rank,
            });
        }

        let row = sqlx::query(&format!(
            "SELECT {}, \
                (SELECT MAX(p.number) FROM chapters p \
                 WHERE p.story_id = c.story_id AND p.number < c.number AND (p.published OR $3)) AS prev, \
                (SELECT MIN(n.number) FROM chapters n \
                 WHERE n.story_id = c.story_id AND n.number > c.number AND (n.published OR $3)) AS next \
             FROM chapters c \
             WHERE c.story_id = $1 AND c.number = $2 AND (c.published OR $3)",
            CHAPTER_COLUMNS
        ))
        .bind(story.id)
        .bind(number)
        .bind(is_admin)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(ChapterAccess::NotFound);
        };

        Ok(ChapterAccess::Readable(ChapterView {
            story_id: story.id,
            story_slug: story.slug,
            story_title: story.title,
            chapter: row_to_chapter(&row),
            prev: row.get("prev"),
            next: row.get("next"),
        }))
    }

    pub async fn get_story(&self, story_id: Uuid) -> Result<Option<Story>> {
        self.find_story(StoryKey::Id(story_id)).await
    }

    pub async fn create_story(&self, story: NewStory) -> Result<Story> {
        let slug = resolve_slug(story.slug.as_deref(), &story.title)?;
        self.check_tier(story.required_tier_id).await?;

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO stories (slug, title, synopsis, cover_key, required_tier_id, published) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(&slug)
        .bind(&story.title)
        .bind(&story.synopsis)
        .bind(&story.cover_key)
        .bind(story.required_tier_id)
        .bind(story.published)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!(story_id = %id, slug = %slug, "story created");
        self.get_story(id)
            .await?
            .ok_or_else(|| anyhow!("story vanished after insert"))
    }

    pub async fn update_story(&self, story_id: Uuid, changes: StoryChanges) -> Result<Option<Story>> {
        if let Some(ref slug) = changes.slug {
            if !is_valid_slug(slug) {
                return Err(anyhow!("invalid slug"));
            }
        }
        if let Some(tier_id) = changes.required_tier_id {
            self.check_tier(tier_id).await?;
        }

        let updated: Option<Uuid> = sqlx::query_scalar(
            "UPDATE stories \
             SET slug = COALESCE($2, slug), \
                 title = COALESCE($3, title), \
                 synopsis = CASE WHEN $4 THEN $5 ELSE synopsis END, \
                 cover_key = CASE WHEN $6 THEN $7 ELSE cover_key END, \
                 required_tier_id = CASE WHEN $8 THEN $9 ELSE required_tier_id END, \
                 published = COALESCE($10, published), \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING id",
        )
        .bind(story_id)
        .bind(changes.slug)
        .bind(changes.title)
        .bind(changes.synopsis.is_some())
        .bind(changes.synopsis.flatten())
        .bind(changes.cover_key.is_some())
        .bind(changes.cover_key.flatten())
        .bind(changes.required_tier_id.is_some())
        .bind(changes.required_tier_id.flatten())
        .bind(changes.published)
        .fetch_optional(self.db.pool())
        .await?;

        match updated {
            Some(_) => self.get_story(story_id).await,
            None => Ok(None),
        }
    }

    /// Chapters and gallery rows go with the story. Returns the gallery keys
    /// so the objects can be removed.
    pub async fn delete_story(&self, story_id: Uuid) -> Result<Option<Vec<String>>> {
        let mut tx = self.db.pool().begin().await?;

        let keys: Vec<String> =
            sqlx::query_scalar("SELECT storage_key FROM gallery_items WHERE story_id = $1")
                .bind(story_id)
                .fetch_all(&mut *tx)
                .await?;

        let result = sqlx::query("DELETE FROM stories WHERE id = $1")
            .bind(story_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(keys))
    }

    /// `Ok(None)` when the story does not exist. Without a number the chapter
    /// is appended after the current last one.
    pub async fn create_chapter(&self, story_id: Uuid, chapter: NewChapter) -> Result<Option<Chapter>> {
        let mut tx = self.db.pool().begin().await?;

        let story: Option<Uuid> = sqlx::query_scalar("SELECT id FROM stories WHERE id = $1 FOR UPDATE")
            .bind(story_id)
            .fetch_optional(&mut *tx)
            .await?;
        if story.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let number = match chapter.number {
            Some(number) => number,
            None => {
                sqlx::query_scalar::<_, i32>(
                    "SELECT COALESCE(MAX(number), 0) + 1 FROM chapters WHERE story_id = $1",
                )
                .bind(story_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let row = sqlx::query(
            "INSERT INTO chapters AS c (story_id, number, title, body, published) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING c.id, c.story_id, c.number, c.title, c.body, c.published, c.created_at, c.updated_at",
        )
        .bind(story_id)
        .bind(number)
        .bind(&chapter.title)
        .bind(&chapter.body)
        .bind(chapter.published)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE stories SET updated_at = now() WHERE id = $1")
            .bind(story_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(row_to_chapter(&row)))
    }

    pub async fn update_chapter(
        &self,
        chapter_id: Uuid,
        changes: ChapterChanges,
    ) -> Result<Option<Chapter>> {
        let row = sqlx::query(
            "UPDATE chapters AS c \
             SET title = COALESCE($2, title), \
                 body = COALESCE($3, body), \
                 published = COALESCE($4, published), \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING c.id, c.story_id, c.number, c.title, c.body, c.published, c.created_at, c.updated_at",
        )
        .bind(chapter_id)
        .bind(changes.title)
        .bind(changes.body)
        .bind(changes.published)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(row_to_chapter))
    }

    pub async fn delete_chapter(&self, chapter_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chapters WHERE id = $1")
            .bind(chapter_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Renumbers the story's chapters 1..n in the given order. The ids must be
    /// exactly the story's chapters.
    pub async fn reorder_chapters(
        &self,
        story_id: Uuid,
        ordered: &[Uuid],
    ) -> Result<Option<Vec<ChapterSummary>>> {
        let mut tx = self.db.pool().begin().await?;

        let story: Option<Uuid> = sqlx::query_scalar("SELECT id FROM stories WHERE id = $1 FOR UPDATE")
            .bind(story_id)
            .fetch_optional(&mut *tx)
            .await?;
        if story.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let existing: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM chapters WHERE story_id = $1")
            .bind(story_id)
            .fetch_all(&mut *tx)
            .await?;
        if !is_permutation(&existing, ordered) {
            tx.rollback().await?;
            return Err(anyhow!("chapter order must list every chapter exactly once"));
        }

        // Move everything out of the way first; (story_id, number) is unique.
        sqlx::query("UPDATE chapters SET number = -number WHERE story_id = $1")
            .bind(story_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chapters c SET number = o.ord::int, updated_at = now() \
             FROM UNNEST($2::uuid[]) WITH ORDINALITY AS o(id, ord) \
             WHERE c.id = o.id AND c.story_id = $1",
        )
        .bind(story_id)
        .bind(ordered)
        .execute(&mut *tx)
        .await?;

        let rows = sqlx::query(
            "SELECT id, number, title, published FROM chapters WHERE story_id = $1 ORDER BY number ASC",
        )
        .bind(story_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(
            rows.into_iter()
                .map(|row| ChapterSummary {
                    id: row.get("id"),
                    number: row.get("number"),
                    title: row.get("title"),
                    published: row.get("published"),
                })
                .collect(),
        ))
    }

    async fn find_story(&self, key: StoryKey<'_>) -> Result<Option<Story>> {
        let (id, slug) = match key {
            StoryKey::Id(id) => (Some(id), None),
            StoryKey::Slug(slug) => (None, Some(slug)),
        };
        let row = sqlx::query(&format!(
            "SELECT {} FROM stories s LEFT JOIN tiers t ON t.id = s.required_tier_id \
             WHERE ($1::uuid IS NOT NULL AND s.id = $1) OR ($2::text IS NOT NULL AND s.slug = $2)",
            STORY_COLUMNS
        ))
        .bind(id)
        .bind(slug)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.as_ref().map(row_to_story))
    }

    async fn viewer_rank(&self, viewer: Option<(Uuid, Role)>) -> Result<i32> {
        match viewer {
            Some((user_id, _)) => Ok(TierService::new(self.db.clone())
                .rank_of_user(user_id)
                .await?
                .unwrap_or(FREE_RANK)),
            None => Ok(FREE_RANK),
        }
    }

    async fn check_tier(&self, tier_id: Option<Uuid>) -> Result<()> {
        if let Some(tier_id) = tier_id {
            if !TierService::new(self.db.clone()).exists(tier_id).await? {
                return Err(anyhow!("tier not found"));
            }
        }
        Ok(())
    }
}

fn is_admin(viewer: Option<(Uuid, Role)>) -> bool {
    viewer.map(|(_, role)| role.is_admin()).unwrap_or(false)
}

fn resolve_slug(requested: Option<&str>, title: &str) -> Result<String> {
    let slug = match requested {
        Some(slug) => slug.trim().to_string(),
        None => slugify(title),
    };
    if !is_valid_slug(&slug) {
        return Err(anyhow!("invalid slug"));
    }
    Ok(slug)
}

fn is_permutation(existing: &[Uuid], ordered: &[Uuid]) -> bool {
    if existing.len() != ordered.len() {
        return false;
    }
    let expected: HashSet<&Uuid> = existing.iter().collect();
    let given: HashSet<&Uuid> = ordered.iter().collect();
    given.len() == ordered.len() && expected == given
}

fn row_to_story(row: &PgRow) -> Story {
    Story {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        synopsis: row.get("synopsis"),
        cover_key: row.get("cover_key"),
        required_tier_id: row.get("required_tier_id"),
        required_rank: row.get("required_rank"),
        published: row.get("published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_chapter(row: &PgRow) -> Chapter {
    Chapter {
        id: row.get("id"),
        story_id: row.get("story_id"),
        number: row.get("number"),
        title: row.get("title"),
        body: row.get("body"),
        published: row.get("published"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
