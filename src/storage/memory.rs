use crate::{
    error::{EmojiError, Result},
    models::{ChangeEvent, ChangeKind, GalleryEntry, NewGalleryEntry},
    storage::{traits::GalleryStore, ChangeFeed, Subscription},
};
use async_trait::async_trait;
use std::sync::RwLock;
use uuid::Uuid;

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryGalleryStore {
    rows: RwLock<Vec<GalleryEntry>>,
    feed: ChangeFeed,
}

impl MemoryGalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned<T>(_: T) -> EmojiError {
        EmojiError::InternalError("Memory store lock poisoned".into())
    }
}

#[async_trait]
impl GalleryStore for MemoryGalleryStore {
    async fn insert(&self, entry: NewGalleryEntry) -> Result<GalleryEntry> {
        if entry.likes < 0 {
            return Err(EmojiError::StoreError("likes must not be negative".into()));
        }
        let row = GalleryEntry {
            id: Uuid::new_v4().to_string(),
            prompt: entry.prompt,
            image_url: entry.image_url,
            created_at: entry.created_at,
            likes: entry.likes,
        };

        self.rows.write().map_err(Self::poisoned)?.push(row.clone());
        self.feed
            .publish(ChangeEvent::new(ChangeKind::Insert, row.id.clone()));
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<GalleryEntry>> {
        let mut rows = self.rows.read().map_err(Self::poisoned)?.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(&self, id: &str) -> Result<Option<GalleryEntry>> {
        let rows = self.rows.read().map_err(Self::poisoned)?;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    async fn update_likes(&self, id: &str, likes: i64) -> Result<()> {
        if likes < 0 {
            return Err(EmojiError::StoreError("likes must not be negative".into()));
        }
        {
            let mut rows = self.rows.write().map_err(Self::poisoned)?;
            let row = rows
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or_else(|| EmojiError::NotFound(format!("emoji {}", id)))?;
            row.likes = likes;
        }
        self.feed.publish(ChangeEvent::new(ChangeKind::Update, id));
        Ok(())
    }

    async fn increment_likes(&self, id: &str) -> Result<i64> {
        let likes = {
            let mut rows = self.rows.write().map_err(Self::poisoned)?;
            let row = rows
                .iter_mut()
                .find(|row| row.id == id)
                .ok_or_else(|| EmojiError::NotFound(format!("emoji {}", id)))?;
            row.likes += 1;
            row.likes
        };
        self.feed.publish(ChangeEvent::new(ChangeKind::Update, id));
        Ok(likes)
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.rows.is_poisoned())
    }
}
