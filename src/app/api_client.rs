use crate::{
    error::GenerationError,
    models::{ErrorResponse, GenerateRequest, GenerateResponse},
    replicate::{classify::classify, ImageGenerator},
};
use async_trait::async_trait;
use reqwest::Client;

/// Calls a running `/api/generate` endpoint, so the submission flow can drive
/// a remote service instead of talking to the provider directly.
#[derive(Clone)]
pub struct GenerateClient {
    client: Client,
    endpoint: String,
}

impl GenerateClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ImageGenerator for GenerateClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            prompt: Some(prompt.to_string()),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .await
                .ok()
                .map(|e| e.error);
            return Err(GenerationError::from_status(status.as_u16(), message));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::unknown(e.to_string()))?;
        Ok(generated.image_url)
    }
}
