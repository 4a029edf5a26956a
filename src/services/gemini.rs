use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

use super::{ModelError, VisionModel};
use crate::models::{FoodImage, Prompt};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-flash-latest";

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Client for Gemini's `generateContent` endpoint
pub struct GeminiService {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiService {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(prompt: &Prompt, image: &FoodImage) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: prompt.as_str().to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type().to_string(),
                            data: general_purpose::STANDARD.encode(image.bytes()),
                        },
                    },
                ],
            }],
        }
    }

    /// Map a non-2xx reply to a typed error. 429 and `RESOURCE_EXHAUSTED`
    /// are the explicit capacity signals.
    fn classify_error(status: reqwest::StatusCode, body: &str) -> ModelError {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());
        let exhausted_status = parsed
            .as_ref()
            .and_then(|e| e.error.status.as_deref())
            .map_or(false, |s| s == "RESOURCE_EXHAUSTED");

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || exhausted_status {
            ModelError::ResourceExhausted { message }
        } else {
            ModelError::Api {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// Concatenate the text parts of the first candidate, unmodified
    fn extract_text(response: GenerateResponse) -> Result<String, ModelError> {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
        {
            return Err(ModelError::EmptyResponse(format!("prompt blocked ({})", reason)));
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::EmptyResponse("no candidates returned".to_string()))?;

        let texts: Vec<String> = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if texts.is_empty() {
            let reason = candidate
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string());
            return Err(ModelError::EmptyResponse(format!(
                "candidate has no text (finish reason: {})",
                reason
            )));
        }

        Ok(texts.concat())
    }
}

#[async_trait::async_trait]
impl VisionModel for GeminiService {
    async fn generate(&self, prompt: &Prompt, image: &FoodImage) -> Result<String, ModelError> {
        log::debug!(
            "📸 Preparing {} image ({} bytes) for {}",
            image.format(),
            image.byte_len(),
            self.model
        );

        let request = Self::build_request(prompt, image);

        log::info!("🤖 Sending request to Gemini with model: {}", self.model);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        log::debug!("📥 Gemini response status: {}", status);

        let body = response.text().await?;

        if !status.is_success() {
            log::error!("❌ Gemini API error ({}): {}", status, body);
            return Err(Self::classify_error(status, &body));
        }

        log::debug!("📄 Raw Gemini response size: {} bytes", body.len());

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let text = Self::extract_text(parsed)?;

        log::info!("✅ Gemini returned {} chars", text.len());
        Ok(text)
    }
}
