pub mod classify;
pub mod orchestrator;

use crate::{
    config::ReplicateConfig,
    error::{EmojiError, Result},
    models::{CreatePrediction, Prediction, PredictionInput},
};
use async_trait::async_trait;
use reqwest::{header, Client};

pub use orchestrator::{ImageGenerator, Orchestrator};

/// Raw failure from the predictions API, before classification.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Replicate API returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Replicate request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid Replicate response: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// The two calls the orchestrator needs from a prediction provider.
#[async_trait]
pub trait PredictionApi: Send + Sync {
    async fn create(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> std::result::Result<Prediction, UpstreamError>;

    async fn get(&self, id: &str) -> std::result::Result<Prediction, UpstreamError>;
}

#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    base_url: String,
    headers: header::HeaderMap,
}

impl ReplicateClient {
    pub fn new(config: &ReplicateConfig) -> Result<Self> {
        let token = config
            .api_token
            .clone()
            .ok_or_else(|| EmojiError::ConfigError("REPLICATE_API_TOKEN is not set".into()))?;

        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers: build_headers(&token)?,
        })
    }

    async fn read_prediction(
        response: reqwest::Response,
    ) -> std::result::Result<Prediction, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl PredictionApi for ReplicateClient {
    async fn create(
        &self,
        version: &str,
        input: &PredictionInput,
    ) -> std::result::Result<Prediction, UpstreamError> {
        let payload = CreatePrediction { version, input };

        let response = self
            .client
            .post(format!("{}/predictions", self.base_url))
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await?;

        Self::read_prediction(response).await
    }

    async fn get(&self, id: &str) -> std::result::Result<Prediction, UpstreamError> {
        let response = self
            .client
            .get(format!("{}/predictions/{}", self.base_url, id))
            .headers(self.headers.clone())
            .send()
            .await?;

        Self::read_prediction(response).await
    }
}

fn build_headers(token: &str) -> Result<header::HeaderMap> {
    let mut headers = header::HeaderMap::new();
    let auth = header::HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| EmojiError::ConfigError(format!("Invalid Replicate token: {}", e)))?;
    headers.insert(header::AUTHORIZATION, auth);
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    Ok(headers)
}
