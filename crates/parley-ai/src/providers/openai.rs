//! OpenAI Chat Completions API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource, retry};
use serde::{Deserialize, Serialize};

use super::{ChatProvider, get_api_key};
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{ChatMessage, ChatModel},
};

/// OpenAI API client (also works against OpenAI-compatible servers)
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(get_api_key(None, &["OPENAI_API_KEY"])?))
    }

    /// Create from a configured key, falling back to the environment
    pub fn from_key_or_env(key: Option<&str>) -> Result<Self> {
        Ok(Self::new(get_api_key(key, &["OPENAI_API_KEY"])?))
    }

    /// Stream a response from OpenAI
    pub async fn stream(
        &self,
        model: &ChatModel,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<MessageEventStream> {
        let request = build_request(model, messages, json_mode);
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        tracing::debug!(
            "chat request: model={} messages={} json_mode={}",
            model.id,
            messages.len(),
            json_mode
        );

        let request_builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request);

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;
        // Reconnecting mid-answer would replay the completion; callers retry instead.
        event_source.set_retry_policy(Box::new(retry::Never));

        // Connection and status failures are returned here, before any text.
        match event_source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => {
                event_source.close();
                return Err(Error::UnexpectedResponse(format!(
                    "event before the stream opened: {}",
                    msg.data
                )));
            }
            Some(Err(e)) => {
                event_source.close();
                return Err(open_error(e).await);
            }
            None => return Err(Error::Sse("stream closed before it opened".into())),
        }

        Ok(Box::pin(create_stream(event_source)))
    }
}

/// Map a failure to open the event stream to a typed error
async fn open_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            Error::from_status(status, body)
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

#[async_trait]
impl ChatProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &ChatModel,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<MessageEventStream> {
        OpenAIProvider::stream(self, model, messages, json_mode).await
    }
}

fn build_request(model: &ChatModel, messages: &[ChatMessage], json_mode: bool) -> OpenAIRequest {
    OpenAIRequest {
        model: model.id.clone(),
        messages: messages
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role.as_str(),
                content: m.content.clone(),
            })
            .collect(),
        stream: true,
        n: 1,
        max_tokens: Some(model.max_tokens),
        temperature: Some(model.temperature),
        response_format: json_mode.then(|| ResponseFormat {
            format_type: "json_object",
        }),
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut finish_reason: Option<String> = None;

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: std::result::Result<StreamChunk, _> = serde_json::from_str(&msg.data);
                    match chunk {
                        Ok(chunk) => {
                            // Only one choice is requested.
                            if let Some(choice) = chunk.choices.first() {
                                if let Some(content) = choice.delta.content.as_deref().filter(|c| !c.is_empty()) {
                                    accumulated_text.push_str(content);
                                    yield MessageEvent::TextDelta {
                                        delta: content.to_string(),
                                    };
                                }

                                if let Some(ref reason) = choice.finish_reason {
                                    finish_reason = Some(reason.clone());
                                }
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) if finish_reason.is_some() => break,
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: "stream ended before the answer finished".to_string(),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield MessageEvent::Done {
            text: accumulated_text,
            finish_reason,
        };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
