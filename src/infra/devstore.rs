//! JSON-file stand-ins for the engagement and gallery tables.
//!
//! Used only when `DEV_FALLBACK_DIR` is configured and Postgres cannot be
//! reached. Each table is one file holding a JSON array of records.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::infra::db::is_unavailable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevTable {
    Likes,
    Comments,
    Purchases,
    Gallery,
}

impl DevTable {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Likes => "likes.json",
            Self::Comments => "comments.json",
            Self::Purchases => "purchases.json",
            Self::Gallery => "gallery.json",
        }
    }
}

#[derive(Clone)]
pub struct DevStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl DevStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create dev fallback dir {}", root.display()))?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn read<T: DeserializeOwned>(&self, table: DevTable) -> Result<Vec<T>> {
        let _guard = self.write_lock.lock().await;
        self.load(table).await
    }

    /// Load, mutate and persist a table under the store lock.
    pub async fn update<T, R, F>(&self, table: DevTable, mutate: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut Vec<T>) -> R,
    {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load(table).await?;
        let result = mutate(&mut rows);
        self.save(table, &rows).await?;
        Ok(result)
    }

    async fn load<T: DeserializeOwned>(&self, table: DevTable) -> Result<Vec<T>> {
        let path = self.root.join(table.file_name());
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(anyhow!(err).context(format!("failed to read {}", path.display()))),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw).with_context(|| format!("malformed {}", path.display()))
    }

    async fn save<T: Serialize>(&self, table: DevTable, rows: &[T]) -> Result<()> {
        let path = self.root.join(table.file_name());
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(rows)?;
        tokio::fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Hands back the dev store for a failed database call, or the original
/// error when the fallback is off or the failure was not connectivity.
pub fn fallback_to<'a>(
    store: Option<&'a DevStore>,
    err: anyhow::Error,
    operation: &'static str,
) -> Result<&'a DevStore> {
    match store {
        Some(store) if is_unavailable(&err) => {
            warn!(error = ?err, operation, "database unavailable, using dev fallback");
            Ok(store)
        }
        _ => Err(err),
    }
}

/// Keyset page over an in-memory list already sorted newest first.
pub fn page_desc<T, K>(
    rows: Vec<T>,
    cursor: Option<(OffsetDateTime, Uuid)>,
    limit: i64,
    key: K,
) -> Vec<T>
where
    K: Fn(&T) -> (OffsetDateTime, Uuid),
{
    let limit = usize::try_from(limit).unwrap_or(0);
    rows.into_iter()
        .filter(|row| match cursor {
            Some(after) => key(row) < after,
            None => true,
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: Uuid,
        label: String,
    }

    #[tokio::test]
    async fn missing_table_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DevStore::open(dir.path().join("nested")).unwrap();
        let rows: Vec<Row> = store.read(DevTable::Likes).await.unwrap();
        assert!(rows.is_empty());
        assert!(store.root().exists());
    }

    #[tokio::test]
    async fn update_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = DevStore::open(dir.path()).unwrap();
        let id = Uuid::new_v4();

        let len = store
            .update(DevTable::Comments, |rows: &mut Vec<Row>| {
                rows.push(Row { id, label: "first".into() });
                rows.len()
            })
            .await
            .unwrap();
        assert_eq!(len, 1);

        let reopened = DevStore::open(dir.path()).unwrap();
        let rows: Vec<Row> = reopened.read(DevTable::Comments).await.unwrap();
        assert_eq!(rows, vec![Row { id, label: "first".into() }]);
        assert!(!dir.path().join("comments.json.tmp").exists());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("purchases.json"), b"{not json").unwrap();
        let store = DevStore::open(dir.path()).unwrap();
        let result: Result<Vec<Row>> = store.read(DevTable::Purchases).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = DevStore::open(dir.path()).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .update(DevTable::Gallery, |rows: &mut Vec<Row>| {
                            rows.push(Row { id: Uuid::new_v4(), label: i.to_string() });
                        })
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let rows: Vec<Row> = store.read(DevTable::Gallery).await.unwrap();
        assert_eq!(rows.len(), 16);
    }

    #[test]
    fn fallback_only_for_unavailable_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = DevStore::open(dir.path()).unwrap();

        let down = anyhow::Error::new(sqlx::Error::PoolTimedOut);
        assert!(fallback_to(Some(&store), down, "like").is_ok());

        let down = anyhow::Error::new(sqlx::Error::PoolTimedOut);
        assert!(fallback_to(None, down, "like").is_err());

        let query_failed = anyhow::Error::new(sqlx::Error::RowNotFound);
        assert!(fallback_to(Some(&store), query_failed, "like").is_err());
    }

    #[test]
    fn page_desc_respects_cursor_and_limit() {
        let now = OffsetDateTime::now_utc();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let rows: Vec<(OffsetDateTime, Uuid)> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (now - Duration::minutes(i as i64), *id))
            .collect();

        let first = page_desc(rows.clone(), None, 2, |row| *row);
        assert_eq!(first, rows[..2].to_vec());

        let next = page_desc(rows.clone(), Some(rows[1]), 10, |row| *row);
        assert_eq!(next, rows[2..].to_vec());
    }
}
