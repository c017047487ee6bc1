pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::config::AppConfig;
use crate::infra::{cache::RedisCache, db::Db, devstore::DevStore, storage::ObjectStorage};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub storage: ObjectStorage,
    /// Set only when `DEV_FALLBACK_DIR` is configured.
    pub fallback: Option<DevStore>,
    pub upload_url_ttl_seconds: u64,
    pub media_url_ttl_seconds: u64,
    pub upload_max_bytes: i64,
    pub paseto_access_key: [u8; 32],
    pub paseto_refresh_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
    pub feed_cache_ttl_seconds: u64,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        db: Db,
        cache: RedisCache,
        storage: ObjectStorage,
        fallback: Option<DevStore>,
    ) -> Self {
        Self {
            db,
            cache,
            storage,
            fallback,
            upload_url_ttl_seconds: config.upload_url_ttl_seconds,
            media_url_ttl_seconds: config.media_url_ttl_seconds,
            upload_max_bytes: config.upload_max_bytes,
            paseto_access_key: config.paseto_access_key,
            paseto_refresh_key: config.paseto_refresh_key,
            access_ttl_minutes: config.access_ttl_minutes,
            refresh_ttl_days: config.refresh_ttl_days,
            feed_cache_ttl_seconds: config.feed_cache_ttl_seconds,
        }
    }
}
