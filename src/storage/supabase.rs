use crate::{
    config::SupabaseConfig,
    error::{EmojiError, Result},
    models::{ChangeEvent, ChangeKind, GalleryEntry, NewGalleryEntry},
    storage::{traits::GalleryStore, ChangeFeed, Subscription},
};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

const MAX_CAS_ATTEMPTS: usize = 8;

/// The `emojis` table behind a Supabase (PostgREST) endpoint.
///
/// Change notifications cover writes made through this client only.
pub struct SupabaseGalleryStore {
    client: Client,
    table_url: String,
    headers: header::HeaderMap,
    feed: ChangeFeed,
}

impl SupabaseGalleryStore {
    pub async fn new(config: SupabaseConfig) -> Result<Self> {
        let base_url = config
            .url
            .ok_or_else(|| EmojiError::ConfigError("SUPABASE_URL is required".into()))?;
        let key = config
            .key
            .ok_or_else(|| EmojiError::ConfigError("SUPABASE_KEY is required".into()))?;

        let store = Self {
            client: Client::new(),
            table_url: format!(
                "{}/rest/v1/{}",
                base_url.trim_end_matches('/'),
                config.table
            ),
            headers: build_headers(&key)?,
            feed: ChangeFeed::new(),
        };

        if !store.health_check().await? {
            log::warn!("Supabase table {} is not reachable yet", store.table_url);
        }

        Ok(store)
    }

    fn request(&self, method: reqwest::Method) -> RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .headers(self.headers.clone())
    }

    async fn rows(response: Response, action: &str) -> Result<Vec<GalleryEntry>> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmojiError::StoreError(format!(
                "{} failed ({}): {}",
                action, status, error_text
            )));
        }
        response.json().await.map_err(|e| {
            EmojiError::ResponseError(format!("Failed to parse {} response: {}", action, e))
        })
    }

    /// The stored count as-is, `None` when the column is NULL.
    async fn current_likes(&self, id: &str) -> Result<Option<i64>> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("select", "likes".to_string()), ("id", format!("eq.{}", id))])
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase select failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmojiError::StoreError(format!(
                "select failed ({}): {}",
                status, error_text
            )));
        }
        let rows: Vec<LikesRow> = response.json().await.map_err(|e| {
            EmojiError::ResponseError(format!("Failed to parse select response: {}", e))
        })?;

        rows.into_iter()
            .next()
            .map(|row| row.likes)
            .ok_or_else(|| EmojiError::NotFound(format!("emoji {}", id)))
    }

    /// Writes `likes`, optionally only when the stored value still matches
    /// the PostgREST filter in `expected` (`eq.N` or `is.null`).
    async fn patch_likes(&self, id: &str, likes: i64, expected: Option<String>) -> Result<bool> {
        let mut query = vec![("id", format!("eq.{}", id))];
        if let Some(expected) = expected {
            query.push(("likes", expected));
        }

        let response = self
            .request(reqwest::Method::PATCH)
            .query(&query)
            .header("Prefer", "return=representation")
            .json(&json!({ "likes": likes }))
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase update failed: {}", e)))?;

        let updated = Self::rows(response, "update").await?;
        Ok(!updated.is_empty())
    }
}

#[async_trait]
impl GalleryStore for SupabaseGalleryStore {
    async fn insert(&self, entry: NewGalleryEntry) -> Result<GalleryEntry> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(&[&entry])
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase insert failed: {}", e)))?;

        let row = Self::rows(response, "insert")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmojiError::ResponseError("Insert returned no row".into()))?;

        self.feed
            .publish(ChangeEvent::new(ChangeKind::Insert, row.id.clone()));
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<GalleryEntry>> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("select", "*"), ("order", "created_at.desc")])
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase select failed: {}", e)))?;

        Self::rows(response, "select").await
    }

    async fn get(&self, id: &str) -> Result<Option<GalleryEntry>> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("select", "*".to_string()), ("id", format!("eq.{}", id))])
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase select failed: {}", e)))?;

        Ok(Self::rows(response, "select").await?.into_iter().next())
    }

    async fn update_likes(&self, id: &str, likes: i64) -> Result<()> {
        if likes < 0 {
            return Err(EmojiError::StoreError("likes must not be negative".into()));
        }
        if !self.patch_likes(id, likes, None).await? {
            return Err(EmojiError::NotFound(format!("emoji {}", id)));
        }
        self.feed.publish(ChangeEvent::new(ChangeKind::Update, id));
        Ok(())
    }

    /// PostgREST has no increment, so this is a compare-and-swap on the
    /// current count, retried while other writers win the race.
    async fn increment_likes(&self, id: &str) -> Result<i64> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.current_likes(id).await?;
            let next = current.unwrap_or(0) + 1;

            if self.patch_likes(id, next, Some(likes_filter(current))).await? {
                self.feed.publish(ChangeEvent::new(ChangeKind::Update, id));
                return Ok(next);
            }
            log::debug!("Like on {} lost a race (attempt {})", id, attempt);
        }

        Err(EmojiError::StoreError(format!(
            "Gave up liking {} after {} conflicting updates",
            id, MAX_CAS_ATTEMPTS
        )))
    }

    fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Supabase health check failed: {}", e)))?;

        Ok(response.status().is_success())
    }
}

#[derive(Deserialize)]
struct LikesRow {
    likes: Option<i64>,
}

/// PostgREST never matches NULL with `eq.`, so a NULL count needs `is.null`.
fn likes_filter(current: Option<i64>) -> String {
    match current {
        Some(n) => format!("eq.{}", n),
        None => "is.null".to_string(),
    }
}

fn build_headers(key: &str) -> Result<header::HeaderMap> {
    let invalid = |e: header::InvalidHeaderValue| {
        EmojiError::ConfigError(format!("Invalid Supabase key: {}", e))
    };

    let mut headers = header::HeaderMap::new();
    headers.insert("apikey", header::HeaderValue::from_str(key).map_err(invalid)?);
    headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", key)).map_err(invalid)?,
    );
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_url_and_key() {
        let err = SupabaseGalleryStore::new(SupabaseConfig::new()).await.err();
        assert!(matches!(err, Some(EmojiError::ConfigError(_))));
    }

    #[test]
    fn test_headers_carry_key_twice() {
        let headers = build_headers("anon-key").unwrap();
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer anon-key");
        assert!(build_headers("bad\nkey").is_err());
    }

    #[test]
    fn test_likes_filter() {
        assert_eq!(likes_filter(Some(0)), "eq.0");
        assert_eq!(likes_filter(Some(7)), "eq.7");
        assert_eq!(likes_filter(None), "is.null");
    }

    #[cfg(feature = "server")]
    mod rest {
        use super::*;
        use actix_web::{web, App, HttpResponse, HttpServer};
        use serde_json::Value;
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Mutex;

        /// One-row `emojis` table with PostgREST filter semantics for `likes`.
        struct FakeTable {
            likes: Mutex<Option<i64>>,
            /// Writes by another client to land just before the next PATCH.
            races: AtomicUsize,
            patches: AtomicUsize,
        }

        impl FakeTable {
            fn new(likes: Option<i64>, races: usize) -> web::Data<Self> {
                web::Data::new(Self {
                    likes: Mutex::new(likes),
                    races: AtomicUsize::new(races),
                    patches: AtomicUsize::new(0),
                })
            }

            fn likes(&self) -> Option<i64> {
                *self.likes.lock().unwrap()
            }
        }

        fn row(likes: Option<i64>) -> Value {
            json!({
                "id": "e1",
                "prompt": "cat",
                "image_url": "https://x/cat.png",
                "created_at": "2024-05-01T12:00:00Z",
                "likes": likes,
            })
        }

        async fn select(table: web::Data<FakeTable>) -> HttpResponse {
            HttpResponse::Ok().json(vec![row(table.likes())])
        }

        async fn update(
            table: web::Data<FakeTable>,
            query: web::Query<HashMap<String, String>>,
            body: web::Json<Value>,
        ) -> HttpResponse {
            table.patches.fetch_add(1, Ordering::SeqCst);
            let mut likes = table.likes.lock().unwrap();
            if table.races.load(Ordering::SeqCst) > 0 {
                table.races.fetch_sub(1, Ordering::SeqCst);
                *likes = Some(likes.unwrap_or(0) + 1);
            }

            let matches = match query.get("likes").map(String::as_str) {
                None => true,
                Some("is.null") => likes.is_none(),
                Some(filter) => filter
                    .strip_prefix("eq.")
                    .and_then(|n| n.parse::<i64>().ok())
                    .map_or(false, |n| *likes == Some(n)),
            };
            if !matches {
                return HttpResponse::Ok().json(Vec::<Value>::new());
            }
            *likes = body["likes"].as_i64();
            HttpResponse::Ok().json(vec![row(*likes)])
        }

        async fn serve(table: web::Data<FakeTable>) -> SupabaseGalleryStore {
            let server = HttpServer::new(move || {
                App::new().app_data(table.clone()).service(
                    web::resource("/rest/v1/emojis")
                        .route(web::get().to(select))
                        .route(web::patch().to(update)),
                )
            })
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
            let addr = server.addrs()[0];
            actix_web::rt::spawn(server.run());

            SupabaseGalleryStore::new(
                SupabaseConfig::new().with_credentials(format!("http://{}", addr), "anon-key"),
            )
            .await
            .unwrap()
        }

        #[actix_web::test]
        async fn test_increment_from_null_likes() {
            let table = FakeTable::new(None, 0);
            let store = serve(table.clone()).await;

            assert_eq!(store.increment_likes("e1").await.unwrap(), 1);
            assert_eq!(table.likes(), Some(1));
            assert_eq!(table.patches.load(Ordering::SeqCst), 1);
        }

        #[actix_web::test]
        async fn test_increment_retries_after_lost_race() {
            let table = FakeTable::new(Some(3), 1);
            let store = serve(table.clone()).await;
            let mut changes = store.subscribe();

            assert_eq!(store.increment_likes("e1").await.unwrap(), 5);
            assert_eq!(table.likes(), Some(5));
            assert_eq!(table.patches.load(Ordering::SeqCst), 2);
            assert_eq!(
                changes.recv().await,
                Some(ChangeEvent::new(ChangeKind::Update, "e1"))
            );
        }

        #[actix_web::test]
        async fn test_listing_reads_null_likes_as_zero() {
            let store = serve(FakeTable::new(None, 0)).await;
            let rows = store.list().await.unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].likes, 0);
        }
    }
}
