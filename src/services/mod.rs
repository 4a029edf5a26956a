pub mod gemini; // Google Gemini generateContent client
pub mod prompts;
pub mod retry;
pub mod vision_model;

pub use gemini::GeminiService;
pub use retry::{Backoff, QuotaMatcher, RetryError, RetryPolicy};
pub use vision_model::{ModelError, VisionModel};
