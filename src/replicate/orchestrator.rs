use crate::{
    config::{PollConfig, ReplicateConfig},
    error::GenerationError,
    models::{Prediction, PredictionInput, PredictionStatus},
    replicate::{classify, PredictionApi, UpstreamError},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Anything that can turn a prompt into an image URL.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Drives one prediction per call from submission to a terminal status.
///
/// Calls share nothing but the API handle, so concurrent `generate` calls each
/// own their job id and polling state.
#[derive(Clone)]
pub struct Orchestrator {
    api: Arc<dyn PredictionApi>,
    version: String,
    poll: PollConfig,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn PredictionApi>, config: &ReplicateConfig) -> Self {
        Self {
            api,
            version: config.model_version.clone(),
            poll: config.poll.clone(),
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn poll_config(&self) -> &PollConfig {
        &self.poll
    }

    async fn run(&self, prompt: &str) -> Result<String, GenerationError> {
        let input = PredictionInput::for_prompt(prompt);

        let job = self
            .api
            .create(&self.version, &input)
            .await
            .map_err(upstream_failure)?;
        log::info!("Started prediction {} ({})", job.id, job.status.as_str());

        let completed = self.wait_for(&job.id).await?;
        log::info!(
            "Completed prediction {} with status {}",
            completed.id,
            completed.status.as_str()
        );

        finish(completed)
    }

    async fn wait_for(&self, id: &str) -> Result<Prediction, GenerationError> {
        let mut current = self.api.get(id).await.map_err(upstream_failure)?;
        let mut attempt = 0;

        while !current.status.is_terminal() {
            tokio::time::sleep(self.poll.delay_for(attempt)).await;
            attempt += 1;
            current = self.api.get(id).await.map_err(upstream_failure)?;
            log::info!("Prediction {} status: {}", id, current.status.as_str());
        }

        Ok(current)
    }
}

#[async_trait]
impl ImageGenerator for Orchestrator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::invalid_prompt());
        }

        log::info!("Generating emoji with prompt: {}", prompt);
        let _timer = crate::logger::timer("generate");

        let outcome = match self.poll.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run(prompt))
                .await
                .unwrap_or(Err(GenerationError::Timeout(deadline))),
            None => self.run(prompt).await,
        };

        if let Err(e) = &outcome {
            log::error!("Error generating emoji: {}", e);
        }
        outcome
    }
}

fn upstream_failure(err: UpstreamError) -> GenerationError {
    log::warn!("Replicate call failed: {}", err);
    classify::classify(&err)
}

fn finish(prediction: Prediction) -> Result<String, GenerationError> {
    match prediction.status {
        PredictionStatus::Succeeded => prediction
            .first_output()
            .map(String::from)
            .ok_or(GenerationError::EmptyOutput),
        PredictionStatus::Canceled => Err(GenerationError::provider(Some(
            prediction
                .error_message()
                .as_deref()
                .unwrap_or("Prediction canceled"),
        ))),
        _ => Err(GenerationError::provider(
            prediction.error_message().as_deref(),
        )),
    }
}
