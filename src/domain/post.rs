use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.starts_with("image/") {
            Some(Self::Image)
        } else if content_type.starts_with("video/") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub post_id: Uuid,
    pub kind: MediaKind,
    pub storage_key: String,
    pub content_type: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub position: i32,
    /// Presigned URL, filled in at response time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPost {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub creator_username: Option<String>,
    pub creator_display_name: Option<String>,
    pub title: String,
    pub body: String,
    pub price_cents: Option<i64>,
    pub required_tier_id: Option<Uuid>,
    pub assets: Vec<MediaAsset>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl MediaPost {
    pub fn is_priced(&self) -> bool {
        self.price_cents.map(|price| price > 0).unwrap_or(false)
    }
}
