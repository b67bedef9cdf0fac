use crate::{
    error::GenerationError,
    models::{GalleryEntry, NewGalleryEntry},
    replicate::ImageGenerator,
    storage::GalleryStore,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Submitting,
    ErrorShown(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmitError {
    #[error("A generation is already in progress")]
    Busy,
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("No image URL received")]
    MissingImage,
    #[error("{0}")]
    Store(String),
}

struct FlowInner {
    prompt: String,
    state: SubmissionState,
}

/// Prompt box controller: generate, then record the result in the gallery.
///
/// The prompt is only cleared after a successful insert, so a failed attempt
/// can be retried as typed.
pub struct SubmissionFlow {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<dyn GalleryStore>,
    inner: Mutex<FlowInner>,
}

impl SubmissionFlow {
    pub fn new(generator: Arc<dyn ImageGenerator>, store: Arc<dyn GalleryStore>) -> Self {
        Self {
            generator,
            store,
            inner: Mutex::new(FlowInner {
                prompt: String::new(),
                state: SubmissionState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `false` while a submission is in flight (the input is disabled).
    pub fn set_prompt(&self, prompt: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.state == SubmissionState::Submitting {
            return false;
        }
        inner.prompt = prompt.into();
        true
    }

    pub fn prompt(&self) -> String {
        self.lock().prompt.clone()
    }

    pub fn state(&self) -> SubmissionState {
        self.lock().state.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        match &self.lock().state {
            SubmissionState::ErrorShown(message) => Some(message.clone()),
            _ => None,
        }
    }

    pub fn can_submit(&self) -> bool {
        let inner = self.lock();
        inner.state != SubmissionState::Submitting && !inner.prompt.trim().is_empty()
    }

    pub async fn submit(&self) -> Result<GalleryEntry, SubmitError> {
        let prompt = {
            let mut inner = self.lock();
            if inner.state == SubmissionState::Submitting {
                return Err(SubmitError::Busy);
            }
            if inner.prompt.trim().is_empty() {
                return Err(SubmitError::EmptyPrompt);
            }
            inner.state = SubmissionState::Submitting;
            inner.prompt.clone()
        };

        let mut in_flight = InFlight {
            flow: self,
            settled: false,
        };
        let outcome = self.run(&prompt).await;

        {
            let mut inner = self.lock();
            match &outcome {
                Ok(_) => {
                    inner.prompt.clear();
                    inner.state = SubmissionState::Idle;
                }
                Err(e) => {
                    log::error!("Submission failed: {}", e);
                    inner.state = SubmissionState::ErrorShown(e.to_string());
                }
            }
        }
        in_flight.settled = true;

        outcome
    }

    async fn run(&self, prompt: &str) -> Result<GalleryEntry, SubmitError> {
        let image_url = self.generator.generate(prompt).await?;
        if image_url.trim().is_empty() {
            return Err(SubmitError::MissingImage);
        }

        self.store
            .insert(NewGalleryEntry::new(prompt, image_url))
            .await
            .map_err(|e| SubmitError::Store(e.to_string()))
    }
}

/// Returns the flow to `Idle` if a submission future is dropped mid-flight.
struct InFlight<'a> {
    flow: &'a SubmissionFlow,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut inner = self.flow.lock();
            if inner.state == SubmissionState::Submitting {
                inner.state = SubmissionState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmojiError, Result as StoreResult};
    use crate::storage::{MemoryGalleryStore, Subscription};
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct FixedGenerator(std::result::Result<String, GenerationError>);

    #[async_trait]
    impl ImageGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, GenerationError> {
            self.0.clone()
        }
    }

    /// Blocks until released, to observe the in-flight state.
    struct GatedGenerator {
        gate: Notify,
        entered: Notify,
    }

    #[async_trait]
    impl ImageGenerator for GatedGenerator {
        async fn generate(&self, _prompt: &str) -> std::result::Result<String, GenerationError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok("https://x/gated.png".into())
        }
    }

    struct BrokenStore(MemoryGalleryStore);

    #[async_trait]
    impl GalleryStore for BrokenStore {
        async fn insert(&self, _entry: NewGalleryEntry) -> StoreResult<GalleryEntry> {
            Err(EmojiError::StoreError("permission denied for table emojis".into()))
        }
        async fn list(&self) -> StoreResult<Vec<GalleryEntry>> {
            self.0.list().await
        }
        async fn get(&self, id: &str) -> StoreResult<Option<GalleryEntry>> {
            self.0.get(id).await
        }
        async fn update_likes(&self, id: &str, likes: i64) -> StoreResult<()> {
            self.0.update_likes(id, likes).await
        }
        async fn increment_likes(&self, id: &str) -> StoreResult<i64> {
            self.0.increment_likes(id).await
        }
        fn subscribe(&self) -> Subscription {
            self.0.subscribe()
        }
        async fn health_check(&self) -> StoreResult<bool> {
            Ok(true)
        }
    }

    fn flow_with(
        generated: std::result::Result<String, GenerationError>,
    ) -> (SubmissionFlow, Arc<MemoryGalleryStore>) {
        let store = Arc::new(MemoryGalleryStore::new());
        let flow = SubmissionFlow::new(Arc::new(FixedGenerator(generated)), store.clone());
        (flow, store)
    }

    #[tokio::test]
    async fn test_success_inserts_and_clears_prompt() {
        let (flow, store) = flow_with(Ok("https://x/y.png".into()));
        flow.set_prompt("a happy cat");

        let entry = flow.submit().await.unwrap();
        assert_eq!(entry.prompt, "a happy cat");
        assert_eq!(entry.image_url, "https://x/y.png");
        assert_eq!(entry.likes, 0);
        assert_eq!(flow.state(), SubmissionState::Idle);
        assert_eq!(flow.prompt(), "");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_prompt() {
        let (flow, store) = flow_with(Err(GenerationError::BillingRequired));
        flow.set_prompt("a happy cat");

        let err = flow.submit().await.unwrap_err();
        assert_eq!(err, SubmitError::Generation(GenerationError::BillingRequired));
        assert_eq!(
            flow.state(),
            SubmissionState::ErrorShown(
                "Please wait a few minutes after setting up billing before trying again.".into()
            )
        );
        assert_eq!(flow.prompt(), "a happy cat");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_surfaced() {
        let flow = SubmissionFlow::new(
            Arc::new(FixedGenerator(Ok("https://x/y.png".into()))),
            Arc::new(BrokenStore(MemoryGalleryStore::new())),
        );
        flow.set_prompt("cat");

        let err = flow.submit().await.unwrap_err();
        assert!(matches!(err, SubmitError::Store(_)));
        assert!(flow.error_message().unwrap().contains("permission denied"));
        assert_eq!(flow.prompt(), "cat");
    }

    #[tokio::test]
    async fn test_blank_prompt_is_a_no_op() {
        let (flow, _) = flow_with(Ok("https://x/y.png".into()));
        flow.set_prompt("   ");
        assert!(!flow.can_submit());
        assert_eq!(flow.submit().await.unwrap_err(), SubmitError::EmptyPrompt);
        assert_eq!(flow.state(), SubmissionState::Idle);
    }

    #[tokio::test]
    async fn test_error_state_allows_retry() {
        let store = Arc::new(MemoryGalleryStore::new());
        let failing = SubmissionFlow::new(
            Arc::new(FixedGenerator(Err(GenerationError::TransportUnavailable))),
            store.clone(),
        );
        failing.set_prompt("cat");
        assert!(failing.submit().await.is_err());
        assert!(failing.can_submit());
    }

    #[tokio::test]
    async fn test_second_submit_refused_while_in_flight() {
        let generator = Arc::new(GatedGenerator {
            gate: Notify::new(),
            entered: Notify::new(),
        });
        let store = Arc::new(MemoryGalleryStore::new());
        let flow = Arc::new(SubmissionFlow::new(generator.clone(), store.clone()));
        flow.set_prompt("cat");

        let running = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.submit().await })
        };
        generator.entered.notified().await;

        assert_eq!(flow.state(), SubmissionState::Submitting);
        assert!(!flow.can_submit());
        assert!(!flow.set_prompt("dog"));
        assert_eq!(flow.submit().await.unwrap_err(), SubmitError::Busy);

        generator.gate.notify_one();
        let entry = running.await.unwrap().unwrap();
        assert_eq!(entry.image_url, "https://x/gated.png");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
