use crate::{
    config::PostgresConfig,
    error::{EmojiError, Result},
    models::{ChangeEvent, ChangeKind, GalleryEntry, NewGalleryEntry},
    storage::{traits::GalleryStore, ChangeFeed, Subscription},
};
use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use futures::{stream, StreamExt};
use tokio_postgres::{AsyncMessage, NoTls, Row};
use uuid::Uuid;

const CHANNEL: &str = "emojis_changes";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emojis (
    id TEXT PRIMARY KEY,
    prompt TEXT NOT NULL,
    image_url TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    likes BIGINT NOT NULL DEFAULT 0 CHECK (likes >= 0)
);
CREATE INDEX IF NOT EXISTS idx_emojis_created_at ON emojis (created_at DESC);
CREATE OR REPLACE FUNCTION emojis_notify() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify('emojis_changes', TG_OP || ':' || COALESCE(NEW.id, OLD.id));
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;
DROP TRIGGER IF EXISTS emojis_notify ON emojis;
CREATE TRIGGER emojis_notify AFTER INSERT OR UPDATE OR DELETE ON emojis
    FOR EACH ROW EXECUTE FUNCTION emojis_notify();
";

/// The `emojis` table in Postgres. Likes are incremented in SQL and changes
/// arrive through `LISTEN`, so writes from other processes are seen too.
pub struct PostgresGalleryStore {
    pool: Pool,
    feed: ChangeFeed,
    listener: Option<tokio_postgres::Client>,
}

impl PostgresGalleryStore {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = config.host.clone();
        cfg.port = config.port;
        cfg.user = config.username.clone();
        cfg.password = config.password.clone();
        cfg.dbname = config.database.clone();

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| EmojiError::ConfigError(format!("Failed to create pool: {}", e)))?;

        let mut store = Self {
            pool,
            feed: ChangeFeed::new(),
            listener: None,
        };
        store.initialize_schema().await?;
        store.listener = Some(store.listen(&config).await?);

        Ok(store)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| EmojiError::InternalError(format!("Failed to get connection: {}", e)))
    }

    async fn initialize_schema(&self) -> Result<()> {
        self.client()
            .await?
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to create schema: {}", e)))?;

        log::info!("PostgreSQL gallery schema initialized");
        Ok(())
    }

    /// Opens a dedicated connection that forwards notifications to the feed.
    /// The connection lives as long as the returned client.
    async fn listen(&self, config: &PostgresConfig) -> Result<tokio_postgres::Client> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(config.host.as_deref().unwrap_or("localhost"));
        pg.port(config.port.unwrap_or(5432));
        if let Some(user) = &config.username {
            pg.user(user);
        }
        if let Some(password) = &config.password {
            pg.password(password);
        }
        if let Some(database) = &config.database {
            pg.dbname(database);
        }

        let (client, mut connection) = pg
            .connect(NoTls)
            .await
            .map_err(|e| EmojiError::StoreError(format!("LISTEN connection failed: {}", e)))?;

        let feed = self.feed.clone();
        tokio::spawn(async move {
            let mut messages = Box::pin(stream::poll_fn(move |cx| connection.poll_message(cx)));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(note)) => {
                        feed.publish(parse_notification(note.payload()))
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::error!("LISTEN connection closed: {}", e);
                        break;
                    }
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN {}", CHANNEL))
            .await
            .map_err(|e| EmojiError::StoreError(format!("LISTEN failed: {}", e)))?;

        Ok(client)
    }
}

fn row_to_entry(row: &Row) -> GalleryEntry {
    GalleryEntry {
        id: row.get("id"),
        prompt: row.get("prompt"),
        image_url: row.get("image_url"),
        created_at: row.get("created_at"),
        likes: row.get("likes"),
    }
}

fn parse_notification(payload: &str) -> ChangeEvent {
    let (op, id) = payload.split_once(':').unwrap_or((payload, ""));
    let kind = match op {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return ChangeEvent::resync(),
    };
    ChangeEvent::new(kind, id)
}

#[async_trait]
impl GalleryStore for PostgresGalleryStore {
    async fn insert(&self, entry: NewGalleryEntry) -> Result<GalleryEntry> {
        let client = self.client().await?;
        let id = Uuid::new_v4().to_string();

        let row = client
            .query_one(
                "INSERT INTO emojis (id, prompt, image_url, created_at, likes)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id, prompt, image_url, created_at, likes",
                &[
                    &id,
                    &entry.prompt,
                    &entry.image_url,
                    &entry.created_at,
                    &entry.likes,
                ],
            )
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to insert emoji: {}", e)))?;

        Ok(row_to_entry(&row))
    }

    async fn list(&self) -> Result<Vec<GalleryEntry>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, prompt, image_url, created_at, likes FROM emojis
                 ORDER BY created_at DESC, id",
                &[],
            )
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to list emojis: {}", e)))?;

        Ok(rows.iter().map(row_to_entry).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<GalleryEntry>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT id, prompt, image_url, created_at, likes FROM emojis WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to get emoji: {}", e)))?;

        Ok(row.as_ref().map(row_to_entry))
    }

    async fn update_likes(&self, id: &str, likes: i64) -> Result<()> {
        let client = self.client().await?;
        let updated = client
            .execute("UPDATE emojis SET likes = $2 WHERE id = $1", &[&id, &likes])
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to update likes: {}", e)))?;

        if updated == 0 {
            return Err(EmojiError::NotFound(format!("emoji {}", id)));
        }
        Ok(())
    }

    async fn increment_likes(&self, id: &str) -> Result<i64> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "UPDATE emojis SET likes = likes + 1 WHERE id = $1 RETURNING likes",
                &[&id],
            )
            .await
            .map_err(|e| EmojiError::StoreError(format!("Failed to like emoji: {}", e)))?
            .ok_or_else(|| EmojiError::NotFound(format!("emoji {}", id)))?;

        Ok(row.get("likes"))
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    async fn health_check(&self) -> Result<bool> {
        let client = self.client().await?;
        let listening = self.listener.as_ref().map_or(false, |l| !l.is_closed());
        Ok(listening && client.simple_query("SELECT 1").await.is_ok())
    }
}
