//! Gemini image generation through `generateContent`

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use super::get_api_key;
use crate::{
    error::{Error, Result},
    image::{ImageGenerator, ImageRequest},
};

/// Default image model
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(\d+)\}").unwrap());

/// Gemini image client
pub struct GeminiImageClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiImageClient {
    /// Create a client; `None` selects the default model
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: resolve_model(model),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `GOOGLE_API_KEY` (or `GEMINI_API_KEY`)
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        Self::from_key_or_env(None, model)
    }

    /// Create from a configured key, falling back to the environment
    pub fn from_key_or_env(key: Option<&str>, model: Option<&str>) -> Result<Self> {
        let api_key = get_api_key(key, &["GOOGLE_API_KEY", "GEMINI_API_KEY"])?;
        Ok(Self::new(api_key, model))
    }

    /// Point the client at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn load_images(&self, request: &ImageRequest) -> Result<Vec<InlineData>> {
        let mut images = Vec::with_capacity(request.ref_images.len());
        for path in &request.ref_images {
            let bytes = tokio::fs::read(path).await?;
            images.push(InlineData {
                mime_type: mime_type_for(path).to_string(),
                data: STANDARD.encode(bytes),
            });
        }
        Ok(images)
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<Vec<u8>>> {
        request.validate()?;
        tracing::info!(
            "image generation start (model={}, refs={})",
            self.model,
            request.ref_images.len()
        );

        let images = self.load_images(request).await?;
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: build_parts(&request.prompt, images),
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["IMAGE", "TEXT"],
                candidate_count: request.number_of_images,
                seed: request.seed,
                image_config: ImageConfig {
                    aspect_ratio: request.aspect_ratio.clone(),
                    image_size: request.resolution.clone(),
                },
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(Error::from_status(status, message));
        }

        let parsed: GenerateResponse = response.json().await?;
        let images = extract_images(parsed)?;
        tracing::info!("image generation done ({} image(s))", images.len());
        Ok(images)
    }
}

/// Map legacy `imagen-*` names onto the default Gemini image model.
fn resolve_model(model: Option<&str>) -> String {
    match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) if !m.starts_with("imagen-") => m.to_string(),
        _ => DEFAULT_IMAGE_MODEL.to_string(),
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "image/png",
    }
}

/// Interleave prompt text with reference images at `{N}` placeholders.
///
/// Out-of-range placeholders stay in the text. Without any placeholder the
/// images come first, followed by the whole prompt.
fn build_parts(prompt: &str, images: Vec<InlineData>) -> Vec<Part> {
    if !PLACEHOLDER.is_match(prompt) {
        let mut parts: Vec<Part> = images
            .into_iter()
            .map(|inline_data| Part::InlineData { inline_data })
            .collect();
        parts.push(Part::Text {
            text: prompt.to_string(),
        });
        return parts;
    }

    let mut parts = Vec::new();
    let mut pending = String::new();
    let mut last_end = 0;

    for caps in PLACEHOLDER.captures_iter(prompt) {
        let Some(whole) = caps.get(0) else { continue };
        pending.push_str(&prompt[last_end..whole.start()]);
        last_end = whole.end();

        let image = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|idx| images.get(idx).cloned());

        match image {
            Some(inline_data) => {
                if !pending.is_empty() {
                    parts.push(Part::Text {
                        text: std::mem::take(&mut pending),
                    });
                }
                parts.push(Part::InlineData { inline_data });
            }
            None => pending.push_str(whole.as_str()),
        }
    }

    pending.push_str(&prompt[last_end..]);
    if !pending.is_empty() {
        parts.push(Part::Text { text: pending });
    }
    parts
}

fn extract_images(response: GenerateResponse) -> Result<Vec<Vec<u8>>> {
    if response.candidates.is_empty() {
        return Err(Error::UnexpectedResponse("No candidates in response".into()));
    }

    let mut images = Vec::new();
    let mut texts = Vec::new();
    for part in response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
    {
        if let Some(inline) = part.inline_data.filter(|d| !d.data.is_empty()) {
            let bytes = STANDARD
                .decode(inline.data.as_bytes())
                .map_err(|e| Error::UnexpectedResponse(format!("invalid image data: {}", e)))?;
            images.push(bytes);
        } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            texts.push(text);
        }
    }

    if images.is_empty() {
        let text = (!texts.is_empty()).then(|| texts.join(" "));
        return Err(Error::NoImage { text });
    }
    Ok(images)
}

// Request types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

// Response types

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
