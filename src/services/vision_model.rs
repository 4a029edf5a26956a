use thiserror::Error;

use crate::models::{FoodImage, Prompt};

/// Failure of a single remote model call
#[derive(Debug, Error)]
pub enum ModelError {
    /// Explicit rate-limit / quota exhaustion signal from the service
    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },
    #[error("Model API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
    #[error("Model returned no text: {0}")]
    EmptyResponse(String),
}

impl ModelError {
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, ModelError::ResourceExhausted { .. })
    }
}

/// Trait for multimodal models that turn a prompt plus a photo into text
#[async_trait::async_trait]
pub trait VisionModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt, image: &FoodImage) -> Result<String, ModelError>;
}
