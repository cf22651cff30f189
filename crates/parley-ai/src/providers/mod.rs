//! Hosted API clients

pub mod gemini;
pub mod openai;

pub use gemini::GeminiImageClient;
pub use openai::OpenAIProvider;

use crate::{ChatMessage, ChatModel, Error, MessageEventStream, Result};
use async_trait::async_trait;

/// Trait for streaming chat-completion providers
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stream a response for the given conversation
    async fn stream(
        &self,
        model: &ChatModel,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the first set environment variable
pub fn get_api_key(provided: Option<&str>, env_vars: &[&'static str]) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    env_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or(Error::InvalidApiKey(env_vars.first().copied().unwrap_or("API key")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_key_wins() {
        let key = get_api_key(Some("sk-test"), &["PARLEY_TEST_UNSET_KEY"]).unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn test_missing_key_names_variable() {
        let err = get_api_key(None, &["PARLEY_TEST_UNSET_KEY"]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_TEST_UNSET_KEY"));
    }
}
