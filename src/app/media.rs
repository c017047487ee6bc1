use anyhow::{anyhow, Result};
use bytes::Bytes;
use image::ImageFormat;
use redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::post::{MediaAsset, MediaKind};
use crate::domain::story::GalleryItem;
use crate::infra::{
    cache::RedisCache,
    storage::{ObjectStorage, PresignedHeader},
};

#[derive(Clone)]
pub struct MediaService {
    cache: RedisCache,
    storage: ObjectStorage,
}

#[derive(Debug, Serialize)]
pub struct UploadedObject {
    pub storage_key: String,
    pub content_type: String,
    pub kind: MediaKind,
    pub bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct UploadIntent {
    pub storage_key: String,
    pub upload_url: String,
    pub expires_in_seconds: u64,
    pub headers: Vec<PresignedHeader>,
}

impl MediaService {
    pub fn new(cache: RedisCache, storage: ObjectStorage) -> Self {
        Self { cache, storage }
    }

    /// Passthrough upload. Images must decode; their dimensions are returned
    /// so the client can attach them to a post.
    pub async fn upload(
        &self,
        owner_id: Uuid,
        content_type: &str,
        body: Bytes,
    ) -> Result<UploadedObject> {
        let ext = extension_from_content_type(content_type)?;
        let kind = supported_kind(content_type).ok_or_else(|| anyhow!("unsupported content type"))?;

        let (width, height) = match kind {
            MediaKind::Image => {
                let (width, height) = image_dimensions(content_type, &body)?;
                (Some(width), Some(height))
            }
            MediaKind::Video => (None, None),
        };

        let storage_key = upload_key(owner_id, ext);
        self.storage
            .put_object(&storage_key, content_type, body.clone())
            .await?;

        tracing::info!(owner_id = %owner_id, key = %storage_key, bytes = body.len(), "upload stored");

        Ok(UploadedObject {
            storage_key,
            content_type: content_type.to_string(),
            kind,
            bytes: body.len() as i64,
            width,
            height,
        })
    }

    /// Presigned PUT for uploads too large to pass through the API.
    pub async fn create_upload_intent(
        &self,
        owner_id: Uuid,
        content_type: &str,
        bytes: i64,
        expires_in_seconds: u64,
    ) -> Result<UploadIntent> {
        let ext = extension_from_content_type(content_type)?;
        let storage_key = upload_key(owner_id, ext);

        let presigned = self
            .storage
            .presign_put(&storage_key, content_type, bytes, expires_in_seconds)
            .await?;

        Ok(UploadIntent {
            storage_key,
            upload_url: presigned.url,
            expires_in_seconds,
            headers: presigned.headers,
        })
    }

    pub async fn delete_objects(&self, keys: &[String]) {
        for key in keys {
            if let Err(err) = self.storage.delete_object(key).await {
                tracing::warn!(error = ?err, key = %key, "failed to delete stored object");
            }
        }
    }

    /// Presigned GET, cached in Redis for most of its lifetime.
    pub async fn presign_get(&self, key: &str, expires_in_seconds: u64) -> Option<String> {
        let cache_key = format!("presigned:{}", key);

        if let Ok(mut conn) = self.cache.client().get_multiplexed_async_connection().await {
            if let Ok(Some(cached)) = conn.get::<_, Option<String>>(&cache_key).await {
                return Some(cached);
            }
        }

        let url = match self.storage.presign_get(key, expires_in_seconds).await {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(error = ?err, key = %key, "failed to presign object");
                return None;
            }
        };

        let cache_ttl = expires_in_seconds.saturating_sub(300);
        if cache_ttl > 0 {
            if let Ok(mut conn) = self.cache.client().get_multiplexed_async_connection().await {
                let _ = conn.set_ex::<_, _, ()>(&cache_key, &url, cache_ttl).await;
            }
        }

        Some(url)
    }

    pub async fn populate_asset_urls(&self, assets: &mut [MediaAsset], expires_in_seconds: u64) {
        let futures: Vec<_> = assets
            .iter()
            .enumerate()
            .map(|(i, asset)| {
                let key = asset.storage_key.clone();
                async move { (i, self.presign_get(&key, expires_in_seconds).await) }
            })
            .collect();

        for (i, url) in futures::future::join_all(futures).await {
            assets[i].url = url;
        }
    }

    pub async fn populate_gallery_urls(&self, items: &mut [GalleryItem], expires_in_seconds: u64) {
        let futures: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let key = item.storage_key.clone();
                async move { (i, self.presign_get(&key, expires_in_seconds).await) }
            })
            .collect();

        for (i, url) in futures::future::join_all(futures).await {
            items[i].url = url;
        }
    }
}

fn upload_key(owner_id: Uuid, ext: &str) -> String {
    format!("uploads/{}/{}.{}", owner_id, Uuid::new_v4(), ext)
}

/// Keys a user may attach: only objects under their own upload prefix.
pub fn is_owned_upload_key(owner_id: Uuid, key: &str) -> bool {
    let prefix = format!("uploads/{}/", owner_id);
    key.strip_prefix(&prefix)
        .map(|rest| !rest.is_empty() && !rest.contains('/') && !rest.contains(".."))
        .unwrap_or(false)
}

pub fn extension_from_content_type(content_type: &str) -> Result<&'static str> {
    match content_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        "video/mp4" => Ok("mp4"),
        "video/webm" => Ok("webm"),
        "video/quicktime" => Ok("mov"),
        _ => Err(anyhow!("unsupported content type")),
    }
}

/// Kind of an attachable content type. Only types accepted for upload count.
pub fn supported_kind(content_type: &str) -> Option<MediaKind> {
    extension_from_content_type(content_type).ok()?;
    MediaKind::from_content_type(content_type)
}

fn image_dimensions(content_type: &str, body: &[u8]) -> Result<(i32, i32)> {
    let format = ImageFormat::from_mime_type(content_type)
        .ok_or_else(|| anyhow!("unsupported content type"))?;
    let image = image::load_from_memory_with_format(body, format)
        .map_err(|err| anyhow!("invalid image: {}", err))?;
    Ok((image.width() as i32, image.height() as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::new(width, height);
        let mut out = Cursor::new(Vec::new());
        buffer
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn allowed_content_types_map_to_extensions() {
        assert_eq!(extension_from_content_type("image/jpeg").unwrap(), "jpg");
        assert_eq!(extension_from_content_type("image/gif").unwrap(), "gif");
        assert_eq!(extension_from_content_type("video/quicktime").unwrap(), "mov");
        assert!(extension_from_content_type("application/pdf").is_err());
        assert!(extension_from_content_type("image/svg+xml").is_err());
    }

    #[test]
    fn supported_kind_follows_upload_allowlist() {
        assert_eq!(supported_kind("image/png"), Some(MediaKind::Image));
        assert_eq!(supported_kind("video/webm"), Some(MediaKind::Video));
        assert_eq!(supported_kind("image/svg+xml"), None);
        assert_eq!(supported_kind("video/x-msvideo"), None);
    }

    #[test]
    fn png_dimensions_are_read() {
        let (width, height) = image_dimensions("image/png", &png_bytes(7, 3)).unwrap();
        assert_eq!((width, height), (7, 3));
    }

    #[test]
    fn garbage_image_is_rejected() {
        let err = image_dimensions("image/png", b"not a png").unwrap_err();
        assert!(err.to_string().starts_with("invalid image"));
    }

    #[test]
    fn upload_keys_are_scoped_to_owner() {
        let owner = Uuid::new_v4();
        let key = upload_key(owner, "jpg");
        assert!(is_owned_upload_key(owner, &key));
        assert!(!is_owned_upload_key(Uuid::new_v4(), &key));
        assert!(!is_owned_upload_key(owner, &format!("uploads/{}/", owner)));
        assert!(!is_owned_upload_key(owner, &format!("uploads/{}/../x.jpg", owner)));
    }
}
