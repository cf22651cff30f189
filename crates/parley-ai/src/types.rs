//! Core types for chat-completion requests

use serde::{Deserialize, Serialize};

/// Message roles understood by chat-completion endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Default chat model identifier
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

/// Default OpenAI-compatible base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatModel {
    /// Model identifier (e.g., "gpt-4o")
    pub id: String,
    /// Base URL for API calls
    pub base_url: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl ChatModel {
    /// Create a model with the default endpoint and sampling parameters
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Override the base URL (OpenAI-compatible servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for ChatModel {
    fn default() -> Self {
        Self {
            id: DEFAULT_CHAT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}
