use crate::{
    error::Result,
    models::{GalleryEntry, NewGalleryEntry},
    storage::Subscription,
};
use async_trait::async_trait;

/// Typed access to the `emojis` collection.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn insert(&self, entry: NewGalleryEntry) -> Result<GalleryEntry>;

    /// All entries, newest `created_at` first.
    async fn list(&self) -> Result<Vec<GalleryEntry>>;

    async fn get(&self, id: &str) -> Result<Option<GalleryEntry>>;

    /// Absolute write of the like counter.
    async fn update_likes(&self, id: &str, likes: i64) -> Result<()>;

    /// Adds one like without losing concurrent updates; returns the new count.
    async fn increment_likes(&self, id: &str) -> Result<i64>;

    /// Fires on any insert, update or delete. Delivery is at-least-once and
    /// may coalesce, so every notification means "re-fetch".
    fn subscribe(&self) -> Subscription;

    async fn health_check(&self) -> Result<bool>;
}
