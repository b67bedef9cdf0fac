use serde::{Deserialize, Serialize};

pub const PROMPT_TEMPLATE_PREFIX: &str = "A cute emoji of ";
pub const PROMPT_TEMPLATE_SUFFIX: &str =
    ", simple flat design, minimalist style, vibrant colors, centered composition, white background";
pub const NEGATIVE_PROMPT: &str =
    "text, watermark, signature, blurry, low quality, username, realistic, 3d, photorealistic, human, face";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

/// A provider-side job as observed through the predictions API.
///
/// `output` and `error` are kept as raw JSON: the provider does not promise
/// their shape, and a non-list output has to be told apart from a missing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    /// First output element, when the output is a non-empty list whose head
    /// is a non-empty string.
    pub fn first_output(&self) -> Option<&str> {
        self.output
            .as_ref()?
            .as_array()?
            .first()?
            .as_str()
            .filter(|s| !s.is_empty())
    }

    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_outputs: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub scheduler: String,
}

impl PredictionInput {
    /// Wraps the user's text in the fixed emoji style template.
    pub fn for_prompt(prompt: &str) -> Self {
        Self {
            prompt: format!("{}{}{}", PROMPT_TEMPLATE_PREFIX, prompt, PROMPT_TEMPLATE_SUFFIX),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            width: 512,
            height: 512,
            num_outputs: 1,
            num_inference_steps: 50,
            guidance_scale: 7.5,
            scheduler: "K_EULER".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePrediction<'a> {
    pub version: &'a str,
    pub input: &'a PredictionInput,
}
