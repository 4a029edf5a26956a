use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{AnalysisReport, AnalysisTask, FoodImage};
use crate::services::prompts;
use crate::services::{RetryError, RetryPolicy, VisionModel};

pub const BUSY_MESSAGE: &str =
    "**Traffic Limit Hit**: Server is too busy right now. Please wait 1 minute.";
pub const MISSING_IMAGE_MESSAGE: &str = "Please upload an image first!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limit or quota; worth trying again later
    TransientCapacity,
    /// Anything else the model service rejected
    Terminal,
    /// The caller never had an image to send
    PreconditionUnmet,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("no image supplied")]
    MissingImage,
    #[error("model still rate limited after {attempts} attempts")]
    Busy { attempts: u32 },
    #[error("{message}")]
    Failed { message: String },
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::MissingImage => ErrorKind::PreconditionUnmet,
            AnalysisError::Busy { .. } => ErrorKind::TransientCapacity,
            AnalysisError::Failed { .. } => ErrorKind::Terminal,
        }
    }

    /// Text suitable for showing to the person who uploaded the photo
    pub fn user_message(&self) -> String {
        match self {
            AnalysisError::MissingImage => MISSING_IMAGE_MESSAGE.to_string(),
            AnalysisError::Busy { .. } => BUSY_MESSAGE.to_string(),
            AnalysisError::Failed { message } => format!("An error occurred: {}", message),
        }
    }
}

/// Runs one food-photo analysis against the vision model, retrying
/// rate-limited calls according to the configured policy.
pub struct AnalysisHandler {
    model: Arc<dyn VisionModel>,
    retry: RetryPolicy,
}

impl AnalysisHandler {
    pub fn new(model: Arc<dyn VisionModel>, retry: RetryPolicy) -> Self {
        Self { model, retry }
    }

    pub async fn analyze_nutrition(
        &self,
        image: Option<FoodImage>,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.analyze(AnalysisTask::Nutrition, image).await
    }

    pub async fn suggest_recipes(
        &self,
        image: Option<FoodImage>,
        extra_ingredients: Option<String>,
    ) -> Result<AnalysisReport, AnalysisError> {
        self.analyze(AnalysisTask::recipes(extra_ingredients), image)
            .await
    }

    /// Every call reaches the model; identical inputs are not cached.
    pub async fn analyze(
        &self,
        task: AnalysisTask,
        image: Option<FoodImage>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let Some(image) = image else {
            log::warn!("⚠️ {} requested without an image, skipping model call", task);
            return Err(AnalysisError::MissingImage);
        };

        log::info!(
            "🍽️ {} ({} request, {} bytes)",
            task.progress_label(),
            task,
            image.byte_len()
        );

        let prompt = prompts::prompt_for(&task);
        let model = self.model.as_ref();
        let (task_ref, prompt_ref, image_ref) = (&task, &prompt, &image);

        let outcome = self
            .retry
            .run(move |attempt| {
                log::debug!("🔁 {} attempt {}", task_ref, attempt);
                model.generate(prompt_ref, image_ref)
            })
            .await;

        match outcome {
            Ok((text, attempts)) => {
                log::info!("✅ {} finished after {} attempt(s)", task, attempts);
                Ok(AnalysisReport {
                    task,
                    text,
                    attempts,
                })
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                log::error!("🚦 {} gave up after {} attempts: {}", task, attempts, last);
                Err(AnalysisError::Busy { attempts })
            }
            Err(RetryError::Fatal { attempt, error }) => {
                log::error!("❌ {} failed on attempt {}: {}", task, attempt, error);
                Err(AnalysisError::Failed {
                    message: error.to_string(),
                })
            }
        }
    }
}
