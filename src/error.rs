use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EmojiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Response error: {0}")]
    ResponseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, EmojiError>;

pub const BILLING_MESSAGE: &str =
    "Please wait a few minutes after setting up billing before trying again.";
pub const TRANSPORT_MESSAGE: &str = "Failed to connect to Replicate API. Please try again.";
pub const PROMPT_REQUIRED_MESSAGE: &str = "Prompt is required";
pub const PREDICTION_FAILED_MESSAGE: &str = "Prediction failed";
pub const EMPTY_OUTPUT_MESSAGE: &str = "No output received from Replicate";
pub const UNKNOWN_MESSAGE: &str = "Failed to generate emoji";

/// Failure taxonomy of a single generation.
///
/// `Display` yields the user-facing message, which is what the HTTP boundary
/// puts in `{"error": ...}` and what the submission flow shows verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{}", BILLING_MESSAGE)]
    BillingRequired,

    #[error("{}", TRANSPORT_MESSAGE)]
    TransportUnavailable,

    /// The prediction reached `failed`; carries the provider's text.
    #[error("{0}")]
    ProviderError(String),

    #[error("{}", EMPTY_OUTPUT_MESSAGE)]
    EmptyOutput,

    #[error("Timed out waiting for prediction after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Unknown(String),
}

impl GenerationError {
    pub fn invalid_prompt() -> Self {
        Self::InvalidInput(PROMPT_REQUIRED_MESSAGE.to_string())
    }

    pub fn provider(message: Option<&str>) -> Self {
        match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => Self::ProviderError(m.to_string()),
            None => Self::ProviderError(PREDICTION_FAILED_MESSAGE.to_string()),
        }
    }

    pub fn unknown(description: impl Into<String>) -> Self {
        let description = description.into();
        if description.trim().is_empty() {
            Self::Unknown(UNKNOWN_MESSAGE.to_string())
        } else {
            Self::Unknown(description)
        }
    }

    /// HTTP status used at the `/api/generate` boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::BillingRequired => 402,
            Self::TransportUnavailable => 503,
            Self::ProviderError(_) | Self::EmptyOutput | Self::Timeout(_) | Self::Unknown(_) => {
                500
            }
        }
    }

    /// Whether a manual retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BillingRequired | Self::TransportUnavailable | Self::Timeout(_)
        )
    }

    /// Inverse of the boundary mapping, for clients of `/api/generate`.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let message = message.unwrap_or_default();
        match status {
            400 if message.trim().is_empty() => Self::invalid_prompt(),
            400 => Self::InvalidInput(message),
            402 => Self::BillingRequired,
            503 => Self::TransportUnavailable,
            _ => Self::unknown(message),
        }
    }
}
