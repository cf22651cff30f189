//! Image generation requests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Maximum number of reference images accepted per request
pub const MAX_REFERENCE_IMAGES: usize = 14;

pub const DEFAULT_ASPECT_RATIO: &str = "1:1";
pub const DEFAULT_RESOLUTION: &str = "1K";

/// A prompt plus optional reference images and generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub ref_images: Vec<PathBuf>,
    #[serde(default = "default_number_of_images")]
    pub number_of_images: u32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default)]
    pub seed: Option<i64>,
}

fn default_number_of_images() -> u32 {
    1
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

fn default_resolution() -> String {
    DEFAULT_RESOLUTION.to_string()
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ref_images: Vec::new(),
            number_of_images: default_number_of_images(),
            aspect_ratio: default_aspect_ratio(),
            resolution: default_resolution(),
            seed: None,
        }
    }

    pub fn with_ref_images(mut self, ref_images: Vec<PathBuf>) -> Self {
        self.ref_images = ref_images;
        self
    }

    /// Check the request before any network traffic
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("prompt is empty".into()));
        }
        if self.ref_images.len() > MAX_REFERENCE_IMAGES {
            return Err(Error::InvalidRequest(format!(
                "too many reference images: {} (max {})",
                self.ref_images.len(),
                MAX_REFERENCE_IMAGES
            )));
        }
        if self.number_of_images == 0 {
            return Err(Error::InvalidRequest(
                "number_of_images must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Something that turns an [`ImageRequest`] into encoded image files.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate images; each entry is one encoded image (PNG or JPEG bytes)
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = ImageRequest::new("a cat");
        assert_eq!(request.number_of_images, 1);
        assert_eq!(request.aspect_ratio, "1:1");
        assert_eq!(request.resolution, "1K");
        assert!(request.seed.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_defaults_from_json() {
        let request: ImageRequest = serde_json::from_str(r#"{"prompt": "a dog"}"#).unwrap();
        assert_eq!(request, ImageRequest::new("a dog"));
    }

    #[test]
    fn test_too_many_reference_images() {
        let refs = (0..=MAX_REFERENCE_IMAGES)
            .map(|i| PathBuf::from(format!("{i}.png")))
            .collect();
        let request = ImageRequest::new("collage").with_ref_images(refs);
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(ImageRequest::new("  ").validate().is_err());
    }
}
