use serde::Serialize;
use thiserror::Error;

/// Upload limit used when nothing else is configured (10 MiB)
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Detect the format from the leading bytes; the uploader's declared
    /// content type is not trusted.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_MAGIC) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("uploaded image is empty")]
    Empty,
    #[error("image is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("unsupported image format (expected JPEG or PNG)")]
    UnsupportedFormat,
}

/// A user-supplied food photo. The payload is opaque to the analysis
/// core; only its format is inspected so it can be labelled for the model.
#[derive(Debug, Clone)]
pub struct FoodImage {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl FoodImage {
    pub fn from_bytes(bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() > max_bytes {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                limit: max_bytes,
            });
        }
        let format = ImageFormat::sniff(&bytes).ok_or(ImageError::UnsupportedFormat)?;

        Ok(Self { bytes, format })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Natural-language instruction sent alongside the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum AnalysisTask {
    /// Per-item calorie and macro breakdown
    Nutrition,
    /// Recipe ideas from the pictured ingredients plus anything extra in the fridge
    Recipes { extra_ingredients: Option<String> },
}

impl AnalysisTask {
    pub fn recipes(extra_ingredients: Option<String>) -> Self {
        let extra_ingredients = extra_ingredients
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        AnalysisTask::Recipes { extra_ingredients }
    }

    /// Shown above a successful result
    pub fn headline(&self) -> &'static str {
        match self {
            AnalysisTask::Nutrition => "Analysis Complete!",
            AnalysisTask::Recipes { .. } => "Recipes Generated!",
        }
    }

    /// Shown while the model is working
    pub fn progress_label(&self) -> &'static str {
        match self {
            AnalysisTask::Nutrition => "Analyzing pixels for calories...",
            AnalysisTask::Recipes { .. } => "Chef is writing recipes...",
        }
    }
}

impl std::fmt::Display for AnalysisTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisTask::Nutrition => "nutrition",
            AnalysisTask::Recipes { .. } => "recipes",
        };
        write!(f, "{}", s)
    }
}

/// Successful outcome of one analysis round trip
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub task: AnalysisTask,
    /// Raw model output, passed through unmodified
    pub text: String,
    /// Remote calls made, including rate-limited ones
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    const TINY_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];

    #[test]
    fn test_sniff_formats() {
        assert_eq!(ImageFormat::sniff(TINY_PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(TINY_JPEG), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
        assert_eq!(ImageFormat::sniff(&[]), None);
    }

    #[test]
    fn test_food_image_validation() {
        let image = FoodImage::from_bytes(TINY_JPEG.to_vec(), DEFAULT_MAX_IMAGE_BYTES).unwrap();
        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.byte_len(), TINY_JPEG.len());

        assert_eq!(
            FoodImage::from_bytes(Vec::new(), DEFAULT_MAX_IMAGE_BYTES).unwrap_err(),
            ImageError::Empty
        );
        assert_eq!(
            FoodImage::from_bytes(TINY_PNG.to_vec(), 4).unwrap_err(),
            ImageError::TooLarge { size: TINY_PNG.len(), limit: 4 }
        );
        assert_eq!(
            FoodImage::from_bytes(b"GIF89a....".to_vec(), DEFAULT_MAX_IMAGE_BYTES).unwrap_err(),
            ImageError::UnsupportedFormat
        );
    }

    #[test]
    fn test_recipes_task_drops_blank_extras() {
        assert_eq!(
            AnalysisTask::recipes(Some("   ".to_string())),
            AnalysisTask::Recipes { extra_ingredients: None }
        );
        assert_eq!(
            AnalysisTask::recipes(Some(" spinach, butter ".to_string())),
            AnalysisTask::Recipes { extra_ingredients: Some("spinach, butter".to_string()) }
        );
    }

    #[test]
    fn test_task_labels() {
        assert_eq!(AnalysisTask::Nutrition.headline(), "Analysis Complete!");
        assert_eq!(AnalysisTask::recipes(None).headline(), "Recipes Generated!");
        assert_eq!(AnalysisTask::recipes(None).to_string(), "recipes");
    }
}
