use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::MediaKind;
use crate::domain::story::GalleryItem;
use crate::infra::db::Db;
use crate::infra::devstore::{fallback_to, DevStore, DevTable};

#[derive(Debug, Clone)]
pub struct NewGalleryItem {
    pub chapter_id: Option<Uuid>,
    pub kind: MediaKind,
    pub storage_key: String,
    pub caption: Option<String>,
}

#[derive(Clone)]
pub struct GalleryService {
    db: Db,
    fallback: Option<DevStore>,
}

impl GalleryService {
    pub fn new(db: Db, fallback: Option<DevStore>) -> Self {
        Self { db, fallback }
    }

    /// Ordered by position, then insertion time.
    pub async fn list(&self, story_id: Uuid, kind: Option<MediaKind>) -> Result<Vec<GalleryItem>> {
        let result = sqlx::query(
            "SELECT id, story_id, chapter_id, kind, storage_key, caption, position, created_at \
             FROM gallery_items \
             WHERE story_id = $1 AND ($2::text IS NULL OR kind = $2) \
             ORDER BY position ASC, created_at ASC",
        )
        .bind(story_id)
        .bind(kind.map(|kind| kind.as_db()))
        .fetch_all(self.db.pool())
        .await;

        let err = match result {
            Ok(rows) => return rows.iter().map(row_to_item).collect(),
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "list_gallery")?;

        let mut items: Vec<GalleryItem> = store
            .read::<GalleryItem>(DevTable::Gallery)
            .await?
            .into_iter()
            .filter(|item| item.story_id == story_id && kind.map_or(true, |kind| item.kind == kind))
            .collect();
        items.sort_by(|a, b| (a.position, a.created_at).cmp(&(b.position, b.created_at)));
        Ok(items)
    }

    /// Appends after the story's current last item. `Ok(None)` when the story
    /// (or the given chapter of it) does not exist.
    pub async fn add_item(&self, story_id: Uuid, item: NewGalleryItem) -> Result<Option<GalleryItem>> {
        let err = match self.add_item_db(story_id, &item).await {
            Ok(created) => return Ok(created),
            Err(err) => err,
        };
        let store = fallback_to(self.fallback.as_ref(), err, "add_gallery_item")?;

        let created = store
            .update(DevTable::Gallery, |items: &mut Vec<GalleryItem>| {
                let position = next_position(items.iter().filter(|i| i.story_id == story_id));
                let created = GalleryItem {
                    id: Uuid::new_v4(),
                    story_id,
                    chapter_id: item.chapter_id,
                    kind: item.kind,
                    storage_key: item.storage_key,
                    caption: item.caption,
                    position,
                    created_at: OffsetDateTime::now_utc(),
                    url: None,
                };
                items.push(created.clone());
                created
            })
            .await?;
        Ok(Some(created))
    }

    async fn add_item_db(&self, story_id: Uuid, item: &NewGalleryItem) -> Result<Option<GalleryItem>> {
        let mut tx = self.db.pool().begin().await?;

        let story: Option<Uuid> = sqlx::query_scalar("SELECT id FROM stories WHERE id = $1 FOR UPDATE")
            .bind(story_id)
            .fetch_optional(&mut *tx)
            .await?;
        if story.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Some(chapter_id) = item.chapter_id {
            let in_story: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM chapters WHERE id = $1 AND story_id = $2)",
            )
            .bind(chapter_id)
            .bind(story_id)
            .fetch_one(&mut *tx)
            .await?;
            if !in_story {
                tx.rollback().await?;
                return Err(anyhow!("chapter not in story"));
            }
        }

        let row = sqlx::query(
            "INSERT INTO gallery_items (story_id, chapter_id, kind, storage_key, caption, position) \
             VALUES ($1, $2, $3, $4, $5, \
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM gallery_items WHERE story_id = $1)) \
             RETURNING id, story_id, chapter_id, kind, storage_key, caption, position, created_at",
        )
        .bind(story_id)
        .bind(item.chapter_id)
        .bind(item.kind.as_db())
        .bind(&item.storage_key)
        .bind(&item.caption)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row_to_item(&row).map(Some)
    }

    /// Returns the removed item so its object can be deleted.
    pub async fn remove_item(&self, item_id: Uuid) -> Result<Option<GalleryItem>> {
        let result = sqlx::query(
            "DELETE FROM gallery_items WHERE id = $1 \
             RETURNING id, story_id, chapter_id, kind, storage_key, caption, position, created_at",
        )
        .bind(item_id)
        .fetch_optional(self.db.pool())
        .await;

        let err = match result {
            Ok(row) => return row.map(|row| row_to_item(&row)).transpose(),
            Err(err) => anyhow::Error::new(err),
        };
        let store = fallback_to(self.fallback.as_ref(), err, "remove_gallery_item")?;

        store
            .update(DevTable::Gallery, |items: &mut Vec<GalleryItem>| {
                let index = items.iter().position(|item| item.id == item_id)?;
                Some(items.remove(index))
            })
            .await
    }
}

fn next_position<'a>(items: impl Iterator<Item = &'a GalleryItem>) -> i32 {
    items.map(|item| item.position).max().unwrap_or(0) + 1
}

fn row_to_item(row: &PgRow) -> Result<GalleryItem> {
    let kind: String = row.get("kind");
    let kind = MediaKind::from_db(&kind).ok_or_else(|| anyhow!("unknown media kind: {}", kind))?;
    Ok(GalleryItem {
        id: row.get("id"),
        story_id: row.get("story_id"),
        chapter_id: row.get("chapter_id"),
        kind,
        storage_key: row.get("storage_key"),
        caption: row.get("caption"),
        position: row.get("position"),
        created_at: row.get("created_at"),
        url: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(story_id: Uuid, position: i32) -> GalleryItem {
        GalleryItem {
            id: Uuid::new_v4(),
            story_id,
            chapter_id: None,
            kind: MediaKind::Image,
            storage_key: "uploads/x/y.jpg".into(),
            caption: None,
            position,
            created_at: OffsetDateTime::now_utc(),
            url: None,
        }
    }

    #[test]
    fn positions_continue_after_the_last_item() {
        let story = Uuid::new_v4();
        assert_eq!(next_position(std::iter::empty()), 1);
        let items = [item(story, 1), item(story, 4), item(story, 2)];
        assert_eq!(next_position(items.iter()), 5);
    }
}
