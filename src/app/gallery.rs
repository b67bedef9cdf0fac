use crate::{
    error::{EmojiError, Result},
    models::{parse_image_url, GalleryEntry},
    storage::GalleryStore,
};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Interval;
use url::Url;

pub const LOAD_ERROR_MESSAGE: &str = "Failed to load emojis";
pub const EMPTY_MESSAGE: &str = "No emojis generated yet. Try creating one!";
pub const INVALID_IMAGE_LABEL: &str = "Invalid image";

#[derive(Debug, Clone, PartialEq)]
pub enum CardImage {
    Image(Url),
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: String,
    pub prompt: String,
    pub likes: i64,
    pub image: CardImage,
    pub download_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GalleryView {
    Loading,
    Error(String),
    Empty(&'static str),
    Grid(Vec<Card>),
}

struct GalleryState {
    loading: bool,
    error: Option<String>,
    entries: Vec<GalleryEntry>,
}

/// In-memory view of the gallery, kept current by re-fetching on every
/// change notification.
pub struct Gallery {
    store: Arc<dyn GalleryStore>,
    http: reqwest::Client,
    state: RwLock<GalleryState>,
    refreshes: watch::Sender<u64>,
}

impl Gallery {
    pub fn new(store: Arc<dyn GalleryStore>) -> Self {
        let (refreshes, _) = watch::channel(0);
        Self {
            store,
            http: reqwest::Client::new(),
            state: RwLock::new(GalleryState {
                loading: true,
                error: None,
                entries: Vec::new(),
            }),
            refreshes,
        }
    }

    /// Subscribes, fetches once, then re-fetches on every notification until
    /// the handle is dropped.
    pub fn mount(self: &Arc<Self>) -> GalleryHandle {
        self.spawn_watcher(None)
    }

    /// Like [`Gallery::mount`], additionally re-fetching on a timer to pick up
    /// writers whose changes the store cannot push.
    pub fn mount_with_refresh(self: &Arc<Self>, every: Duration) -> GalleryHandle {
        self.spawn_watcher(Some(tokio::time::interval(every)))
    }

    fn spawn_watcher(self: &Arc<Self>, mut ticker: Option<Interval>) -> GalleryHandle {
        let mut subscription = self.store.subscribe();
        let gallery = Arc::clone(self);

        let task = tokio::spawn(async move {
            gallery.refresh().await;
            loop {
                tokio::select! {
                    event = subscription.recv() => match event {
                        Some(event) => {
                            log::debug!("Gallery change {:?}, re-fetching", event.kind);
                            gallery.refresh().await;
                        }
                        None => break,
                    },
                    _ = tick(&mut ticker) => {
                        gallery.refresh().await;
                    }
                }
            }
        });

        GalleryHandle { task }
    }

    /// Replaces the entry set with a fresh listing. Returns whether it worked.
    pub async fn refresh(&self) -> bool {
        let fetched = self.store.list().await;
        let ok = fetched.is_ok();

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match fetched {
                Ok(entries) => {
                    state.entries = entries
                        .into_iter()
                        .filter(GalleryEntry::has_valid_url)
                        .collect();
                    state.error = None;
                }
                Err(e) => {
                    log::error!("Error fetching emojis: {}", e);
                    state.error = Some(LOAD_ERROR_MESSAGE.to_string());
                }
            }
            state.loading = false;
        }

        self.refreshes.send_modify(|n| *n += 1);
        ok
    }

    /// Number of completed re-fetches, for callers that need to await one.
    pub fn refreshes(&self) -> watch::Receiver<u64> {
        self.refreshes.subscribe()
    }

    pub fn entries(&self) -> Vec<GalleryEntry> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn view(&self) -> GalleryView {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.loading {
            GalleryView::Loading
        } else if let Some(error) = &state.error {
            GalleryView::Error(error.clone())
        } else if state.entries.is_empty() {
            GalleryView::Empty(EMPTY_MESSAGE)
        } else {
            GalleryView::Grid(state.entries.iter().map(render_card).collect())
        }
    }

    /// Adds a like and re-fetches. Failures are logged, never raised.
    pub async fn like(&self, id: &str) -> Option<i64> {
        match self.store.increment_likes(id).await {
            Ok(likes) => {
                self.refresh().await;
                Some(likes)
            }
            Err(e) => {
                log::error!("Error liking emoji: {}", e);
                None
            }
        }
    }

    /// Saves the entry's image into `dir`. An invalid URL is logged and
    /// skipped with `Ok(None)`.
    pub async fn download(&self, entry: &GalleryEntry, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(url) = entry.parsed_url() else {
            log::error!("Invalid URL: {}", entry.image_url);
            return Ok(None);
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| EmojiError::RequestError(format!("Image download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(EmojiError::ResponseError(format!(
                "Image download failed: {}",
                response.status()
            )));
        }
        let path = download_path(dir, &entry.prompt)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EmojiError::ResponseError(format!("Image download failed: {}", e)))?;

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| EmojiError::InternalError(format!("Failed to save image: {}", e)))?;

        log::info!("Saved {} to {}", entry.image_url, path.display());
        Ok(Some(path))
    }
}

/// Unmounts the gallery watcher when dropped.
pub struct GalleryHandle {
    task: JoinHandle<()>,
}

impl GalleryHandle {
    pub fn unmount(self) {}
}

impl Drop for GalleryHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Card for one entry. The URL is checked again here; the list filter should
/// already have removed bad rows.
pub fn render_card(entry: &GalleryEntry) -> Card {
    let image = match parse_image_url(&entry.image_url) {
        Some(url) => CardImage::Image(url),
        None => CardImage::Invalid(INVALID_IMAGE_LABEL),
    };
    Card {
        id: entry.id.clone(),
        prompt: entry.prompt.clone(),
        likes: entry.likes,
        download_enabled: matches!(image, CardImage::Image(_)),
        image,
    }
}

/// `emoji-<prompt>.png`, each run of whitespace in the prompt becoming one `-`.
/// Path separators and other characters file systems reject become `-` too.
pub fn download_filename(prompt: &str) -> String {
    let mut name = String::with_capacity(prompt.len() + 10);
    name.push_str("emoji-");
    let mut in_space = false;
    for c in prompt.chars() {
        if c.is_whitespace() {
            if !in_space {
                name.push('-');
            }
            in_space = true;
        } else {
            name.push(if is_forbidden_in_filename(c) { '-' } else { c });
            in_space = false;
        }
    }
    name.push_str(".png");
    name
}

fn is_forbidden_in_filename(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Where the download for `prompt` lands: always a direct child of `dir`.
pub fn download_path(dir: &Path, prompt: &str) -> Result<PathBuf> {
    let name = download_filename(prompt);
    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(&name)),
        _ => Err(EmojiError::InternalError(format!(
            "Refusing to save outside {}: {}",
            dir.display(),
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewGalleryEntry;
    use crate::storage::{ChangeFeed, MemoryGalleryStore, Subscription};
    use async_trait::async_trait;
    use chrono::Utc;

    struct UnreachableStore(ChangeFeed);

    #[async_trait]
    impl GalleryStore for UnreachableStore {
        async fn insert(&self, _entry: NewGalleryEntry) -> Result<GalleryEntry> {
            Err(EmojiError::RequestError("connection refused".into()))
        }
        async fn list(&self) -> Result<Vec<GalleryEntry>> {
            Err(EmojiError::RequestError("connection refused".into()))
        }
        async fn get(&self, _id: &str) -> Result<Option<GalleryEntry>> {
            Ok(None)
        }
        async fn update_likes(&self, id: &str, _likes: i64) -> Result<()> {
            Err(EmojiError::NotFound(id.to_string()))
        }
        async fn increment_likes(&self, id: &str) -> Result<i64> {
            Err(EmojiError::NotFound(id.to_string()))
        }
        fn subscribe(&self) -> Subscription {
            self.0.subscribe()
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }
    }

    async fn wait_for_refreshes(gallery: &Gallery, count: u64) {
        let mut rx = gallery.refreshes();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() < count {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .expect("gallery did not refresh in time");
    }

    fn entry(prompt: &str, url: &str) -> GalleryEntry {
        GalleryEntry {
            id: prompt.to_string(),
            prompt: prompt.to_string(),
            image_url: url.to_string(),
            created_at: Utc::now(),
            likes: 0,
        }
    }

    #[test]
    fn test_download_filename() {
        assert_eq!(download_filename("happy cat"), "emoji-happy-cat.png");
        assert_eq!(download_filename("a  b\tc"), "emoji-a-b-c.png");
        assert_eq!(download_filename(" lead"), "emoji--lead.png");
        assert_eq!(download_filename("plain"), "emoji-plain.png");
    }

    #[test]
    fn test_download_stays_inside_target_dir() {
        let dir = Path::new("/tmp/downloads");

        assert_eq!(download_filename("a/b"), "emoji-a-b.png");
        assert_eq!(download_filename("../x"), "emoji-..-x.png");
        assert_eq!(download_filename("c:\\d?"), "emoji-c--d-.png");

        for prompt in ["a/b", "../x", "x/../../etc/passwd", "..\\..\\win", "cat\0dog"] {
            let path = download_path(dir, prompt).unwrap();
            assert_eq!(path.parent(), Some(dir), "prompt {:?}", prompt);
            assert!(path
                .components()
                .all(|c| !matches!(c, Component::ParentDir)));
        }
        assert_eq!(
            download_path(dir, "cat/dog").unwrap(),
            dir.join("emoji-cat-dog.png")
        );
    }

    #[test]
    fn test_render_card_placeholder() {
        let card = render_card(&entry("bad", "not a url"));
        assert_eq!(card.image, CardImage::Invalid("Invalid image"));
        assert!(!card.download_enabled);

        let card = render_card(&entry("good", "https://x/y.png"));
        assert!(matches!(card.image, CardImage::Image(_)));
        assert!(card.download_enabled);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_filtered_from_grid() {
        let store = Arc::new(MemoryGalleryStore::new());
        store
            .insert(NewGalleryEntry::new("bad", "not a url"))
            .await
            .unwrap();
        store
            .insert(NewGalleryEntry::new("good", "https://x/y.png"))
            .await
            .unwrap();

        let gallery = Gallery::new(store.clone());
        assert_eq!(gallery.view(), GalleryView::Loading);
        assert!(gallery.refresh().await);

        match gallery.view() {
            GalleryView::Grid(cards) => {
                assert_eq!(cards.len(), 1);
                assert_eq!(cards[0].prompt, "good");
            }
            other => panic!("unexpected view {:?}", other),
        }
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_view() {
        let gallery = Gallery::new(Arc::new(MemoryGalleryStore::new()));
        gallery.refresh().await;
        assert_eq!(gallery.view(), GalleryView::Empty(EMPTY_MESSAGE));
    }

    #[tokio::test]
    async fn test_failed_fetch_shows_error() {
        let gallery = Gallery::new(Arc::new(UnreachableStore(ChangeFeed::new())));
        assert!(!gallery.refresh().await);
        assert_eq!(
            gallery.view(),
            GalleryView::Error("Failed to load emojis".into())
        );
    }

    #[tokio::test]
    async fn test_like_twice_then_refetch() {
        let store = Arc::new(MemoryGalleryStore::new());
        let row = store
            .insert(NewGalleryEntry::new("cat", "https://x/cat.png"))
            .await
            .unwrap();
        let gallery = Gallery::new(store.clone());

        assert_eq!(gallery.like(&row.id).await, Some(1));
        assert_eq!(gallery.like(&row.id).await, Some(2));
        assert_eq!(gallery.entries()[0].likes, 2);
        assert_eq!(gallery.like("missing").await, None);
    }

    #[tokio::test]
    async fn test_download_invalid_url_is_noop() {
        let gallery = Gallery::new(Arc::new(MemoryGalleryStore::new()));
        let dir = std::env::temp_dir();
        let saved = gallery.download(&entry("bad", "not a url"), &dir).await;
        assert!(matches!(saved, Ok(None)));
    }

    #[tokio::test]
    async fn test_mounted_gallery_follows_changes() {
        let store = Arc::new(MemoryGalleryStore::new());
        let gallery = Arc::new(Gallery::new(store.clone()));
        let handle = gallery.mount();

        wait_for_refreshes(&gallery, 1).await;
        assert_eq!(gallery.view(), GalleryView::Empty(EMPTY_MESSAGE));

        store
            .insert(NewGalleryEntry::new("cat", "https://x/cat.png"))
            .await
            .unwrap();
        wait_for_refreshes(&gallery, 2).await;
        assert_eq!(gallery.entries().len(), 1);

        handle.unmount();
    }
}
