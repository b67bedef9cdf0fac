use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: String,
    pub prompt: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub likes: i64,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(0))
}

impl GalleryEntry {
    /// Parsed image URL, or `None` when the stored value is not an absolute URL.
    pub fn parsed_url(&self) -> Option<Url> {
        parse_image_url(&self.image_url)
    }

    pub fn has_valid_url(&self) -> bool {
        self.parsed_url().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGalleryEntry {
    pub prompt: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub likes: i64,
}

impl NewGalleryEntry {
    pub fn new(prompt: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_url: image_url.into(),
            created_at: Utc::now(),
            likes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notifications were dropped; state is unknown until re-fetched.
    Resync,
}

/// A change notification. Consumers re-fetch; the id is diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: Option<String>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    pub fn resync() -> Self {
        Self {
            kind: ChangeKind::Resync,
            id: None,
        }
    }
}

pub fn parse_image_url(raw: &str) -> Option<Url> {
    Url::parse(raw).ok()
}
