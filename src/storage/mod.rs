pub mod changes;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod supabase;
pub mod traits;

use crate::{
    config::Config,
    error::{EmojiError, Result},
    models::{GalleryEntry, NewGalleryEntry},
};
use async_trait::async_trait;
use std::sync::Arc;

pub use changes::{ChangeFeed, Subscription};
pub use memory::MemoryGalleryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresGalleryStore;
pub use supabase::SupabaseGalleryStore;
pub use traits::GalleryStore;

/// Picks the backend named by [`Config`] and forwards every call to it.
#[derive(Clone)]
pub struct GalleryStoreManager {
    backend: Arc<dyn GalleryStore>,
    name: &'static str,
}

impl GalleryStoreManager {
    pub async fn new(config: &Config) -> Result<Self> {
        if config.use_memory {
            return Ok(Self::with_backend(Arc::new(MemoryGalleryStore::new()), "memory"));
        }

        if config.use_psql {
            #[cfg(feature = "postgres")]
            {
                let postgres_config = config.postgres.clone().ok_or_else(|| {
                    EmojiError::ConfigError("PostgreSQL config required".into())
                })?;
                let backend = PostgresGalleryStore::new(postgres_config).await?;
                return Ok(Self::with_backend(Arc::new(backend), "postgres"));
            }
            #[cfg(not(feature = "postgres"))]
            {
                return Err(EmojiError::ConfigError(
                    "PostgreSQL feature not enabled".into(),
                ));
            }
        }

        match &config.supabase {
            Some(supabase) => {
                let backend = SupabaseGalleryStore::new(supabase.clone()).await?;
                Ok(Self::with_backend(Arc::new(backend), "supabase"))
            }
            None => Err(EmojiError::ConfigError(
                "No gallery store configured: set SUPABASE_URL and SUPABASE_KEY".into(),
            )),
        }
    }

    pub fn with_backend(backend: Arc<dyn GalleryStore>, name: &'static str) -> Self {
        Self { backend, name }
    }

    pub fn storage(&self) -> &Arc<dyn GalleryStore> {
        &self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl GalleryStore for GalleryStoreManager {
    async fn insert(&self, entry: NewGalleryEntry) -> Result<GalleryEntry> {
        self.backend.insert(entry).await
    }

    async fn list(&self) -> Result<Vec<GalleryEntry>> {
        self.backend.list().await
    }

    async fn get(&self, id: &str) -> Result<Option<GalleryEntry>> {
        self.backend.get(id).await
    }

    async fn update_likes(&self, id: &str, likes: i64) -> Result<()> {
        self.backend.update_likes(id, likes).await
    }

    async fn increment_likes(&self, id: &str) -> Result<i64> {
        self.backend.increment_likes(id).await
    }

    fn subscribe(&self) -> Subscription {
        self.backend.subscribe()
    }

    async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }
}
