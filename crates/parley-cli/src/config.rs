//! Configuration file support

use parley_agent::{ControllerConfig, DEFAULT_LOG_DIRECTORY};
use parley_speech::SynthesisEngine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default chat model
    pub model: Option<String>,
    /// Default image generation model
    pub image_model: Option<String>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    pub speech: SpeechSettings,
    pub chat: ChatSettings,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub google: Option<String>,
}

/// Speech synthesis engine and playback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// `voicevox` or `aivisspeech`
    pub engine: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// One speaker id per persona character, in order
    pub speaker_ids: Vec<u32>,
    /// Playback command line, e.g. `"paplay"`
    pub player: Option<String>,
    pub speed_scale: Option<f64>,
}

/// Turn-taking and dialog logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Built-in persona name or path to a persona TOML file
    pub persona: Option<String>,
    pub response_start_threshold_ms: Option<u64>,
    pub idle_reset_secs: Option<u64>,
    pub log_directory: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for PARLEY_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the example config if no config file exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    /// API key from the config file; providers fall back to the environment
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "openai" => self.api_keys.openai.as_deref(),
            "google" => self.api_keys.google.as_deref(),
            _ => None,
        };
        key.filter(|k| !k.is_empty())
    }

    pub fn engine(&self) -> anyhow::Result<SynthesisEngine> {
        match self.speech.engine.as_deref() {
            Some(name) => name.parse().map_err(anyhow::Error::msg),
            None => Ok(SynthesisEngine::default()),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::default();
        if let Some(ms) = self.chat.response_start_threshold_ms {
            config.response_start_threshold = Duration::from_millis(ms);
        }
        if let Some(secs) = self.chat.idle_reset_secs {
            config.idle_reset = Duration::from_secs(secs);
        }
        config
    }

    pub fn log_directory(&self) -> PathBuf {
        PathBuf::from(
            self.chat
                .log_directory
                .as_deref()
                .unwrap_or(DEFAULT_LOG_DIRECTORY),
        )
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml (Linux), ~/Library/Application Support/parley/config.toml (macOS)
# or point PARLEY_CONFIG_PATH at it.

# Chat model (OpenAI-compatible)
model = "gpt-4o"

# Image generation model
image_model = "gemini-3-pro-image-preview"

# API keys (optional - OPENAI_API_KEY / GOOGLE_API_KEY work too)
[api_keys]
# openai = "sk-..."
# google = "..."

[speech]
# voicevox (port 50021) or aivisspeech (port 10101)
engine = "voicevox"
host = "127.0.0.1"
# port = 50021
# One speaker id per character, in persona order
speaker_ids = [3, 2]
# player = "aplay -q"
# speed_scale = 1.0

[chat]
# companion, duo or a path to a persona TOML file
persona = "duo"
response_start_threshold_ms = 1000
idle_reset_secs = 240
log_directory = ".user_data/log"
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.speech.speaker_ids, vec![3, 2]);
        assert_eq!(config.engine().unwrap(), SynthesisEngine::VoiceVox);
        assert_eq!(config.chat.persona.as_deref(), Some("duo"));
        assert!(config.api_key("openai").is_none());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("model = \"gpt-4o-mini\"").unwrap();
        let controller = config.controller_config();
        assert_eq!(controller.response_start_threshold, Duration::from_secs(1));
        assert_eq!(controller.idle_reset, Duration::from_secs(240));
        assert_eq!(config.log_directory(), PathBuf::from(".user_data/log"));
    }

    #[test]
    fn test_chat_settings_override_controller() {
        let config: Config = toml::from_str(
            r#"
[chat]
response_start_threshold_ms = 1500
idle_reset_secs = 60
"#,
        )
        .unwrap();
        let controller = config.controller_config();
        assert_eq!(controller.response_start_threshold, Duration::from_millis(1500));
        assert_eq!(controller.idle_reset, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_engine_is_an_error() {
        let config: Config = toml::from_str("[speech]\nengine = \"festival\"").unwrap();
        assert!(config.engine().is_err());
    }

    #[test]
    fn test_api_key_ignores_empty_values() {
        let config: Config = toml::from_str("[api_keys]\nopenai = \"\"\ngoogle = \"g\"").unwrap();
        assert!(config.api_key("openai").is_none());
        assert_eq!(config.api_key("google"), Some("g"));
    }
}
