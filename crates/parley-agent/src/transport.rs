//! Transport abstraction: from a conversation to a stream of decoded fields

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use parley_ai::{
    ChatMessage, ChatModel, DecodedField, decode_fields, providers::ChatProvider,
    stream::text_chunks,
};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// A stream of completed output fields for one turn; a failure is the last item
pub type FieldStream = Pin<Box<dyn Stream<Item = Result<DecodedField>> + Send>>;

/// Opens the response stream for a turn
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<FieldStream>;
}

/// Calls a chat provider directly and decodes its JSON output
pub struct ProviderTransport {
    provider: Arc<dyn ChatProvider>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn open(
        &self,
        model: &ChatModel,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<FieldStream> {
        let mut attempt = 0u32;

        let events = loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.provider.stream(model, &messages, true).await {
                Ok(events) => break events,
                Err(e) => {
                    if attempt < self.retry_config.max_retries && e.is_retryable() {
                        let delay = self.retry_config.delay_for_attempt(attempt);
                        tracing::warn!(
                            "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                            attempt + 1,
                            self.retry_config.max_retries + 1,
                            e,
                            delay
                        );
                        attempt += 1;
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                    return Err(e.into());
                }
            }
        };

        Ok(Box::pin(
            decode_fields(text_chunks(events)).map(|field| field.map_err(Error::from)),
        ))
    }
}
