//! HTTP client for VOICEVOX-compatible synthesis engines

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Supported local synthesis engines
///
/// Both speak the same `/audio_query` + `/synthesis` protocol and only differ
/// in their default port and speaker ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisEngine {
    #[default]
    VoiceVox,
    #[serde(alias = "aivis")]
    AivisSpeech,
}

impl SynthesisEngine {
    pub fn default_port(&self) -> u16 {
        match self {
            SynthesisEngine::VoiceVox => 50021,
            SynthesisEngine::AivisSpeech => 10101,
        }
    }

    /// A speaker id that exists in a stock installation
    pub fn default_speaker_id(&self) -> u32 {
        match self {
            SynthesisEngine::VoiceVox => 3,
            SynthesisEngine::AivisSpeech => 888753760,
        }
    }
}

impl std::fmt::Display for SynthesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisEngine::VoiceVox => write!(f, "voicevox"),
            SynthesisEngine::AivisSpeech => write!(f, "aivisspeech"),
        }
    }
}

impl std::str::FromStr for SynthesisEngine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "voicevox" => Ok(SynthesisEngine::VoiceVox),
            "aivisspeech" | "aivis" => Ok(SynthesisEngine::AivisSpeech),
            other => Err(format!("unknown synthesis engine: {other}")),
        }
    }
}

/// Turns text into WAV bytes for a given speaker
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<Vec<u8>>;
}

/// Client for one running engine instance
#[derive(Debug, Clone)]
pub struct SynthesisClient {
    client: reqwest::Client,
    base_url: String,
    speed_scale: f64,
}

impl SynthesisClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
            speed_scale: 1.0,
        }
    }

    /// Client for a local engine on its default port
    pub fn local(engine: SynthesisEngine) -> Self {
        Self::new("127.0.0.1", engine.default_port())
    }

    pub fn with_speed_scale(mut self, speed_scale: f64) -> Self {
        self.speed_scale = speed_scale;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn audio_query(&self, text: &str, speaker_id: u32) -> Result<Value> {
        let speaker = speaker_id.to_string();
        let response = self
            .client
            .post(format!("{}/audio_query", self.base_url))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;
        let mut query: Value = response.json().await?;
        tune_query(&mut query, self.speed_scale);
        Ok(query)
    }
}

#[async_trait]
impl Synthesizer for SynthesisClient {
    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<Vec<u8>> {
        tracing::debug!("synthesize: speaker={} text={:?}", speaker_id, text);
        let query = self.audio_query(text, speaker_id).await?;

        let response = self
            .client
            .post(format!("{}/synthesis", self.base_url))
            .query(&[("speaker", speaker_id)])
            .json(&query)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Apply playback tuning to an audio query before synthesis.
fn tune_query(query: &mut Value, speed_scale: f64) {
    if let Some(fields) = query.as_object_mut() {
        fields.insert("speedScale".into(), speed_scale.into());
        fields.insert("prePhonemeLength".into(), 0.0.into());
        fields.insert("postPhonemeLength".into(), 0.0.into());
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Engine {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_defaults() {
        assert_eq!(SynthesisEngine::VoiceVox.default_port(), 50021);
        assert_eq!(SynthesisEngine::AivisSpeech.default_port(), 10101);
        assert_eq!(
            SynthesisClient::local(SynthesisEngine::AivisSpeech).base_url(),
            "http://127.0.0.1:10101"
        );
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("VOICEVOX".parse(), Ok(SynthesisEngine::VoiceVox));
        assert_eq!("aivis".parse(), Ok(SynthesisEngine::AivisSpeech));
        assert!("espeak".parse::<SynthesisEngine>().is_err());
    }

    #[test]
    fn test_tune_query_overrides_timing() {
        let mut query = json!({"speedScale": 1.2, "prePhonemeLength": 0.1, "accent_phrases": []});
        tune_query(&mut query, 1.0);
        assert_eq!(query["speedScale"], 1.0);
        assert_eq!(query["prePhonemeLength"], 0.0);
        assert_eq!(query["postPhonemeLength"], 0.0);
        assert_eq!(query["accent_phrases"], json!([]));
    }
}
