//! Streaming event types and utilities

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};

use crate::error::{Error, Result};

/// Events emitted while a chat completion streams in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Text content delta
    TextDelta { delta: String },
    /// Message completed successfully
    Done {
        text: String,
        finish_reason: Option<String>,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// A stream of raw text fragments; a failed stream ends with one `Err`
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Reduce a message event stream to its text fragments.
///
/// The fragment stream ends at `Done`. An `Error` event is passed on as the
/// final `Err` item so consumers can tell a failure from a finished answer.
pub fn text_chunks(events: MessageEventStream) -> TextChunkStream {
    Box::pin(async_stream::stream! {
        let mut events = events;
        while let Some(event) = events.next().await {
            match event {
                MessageEvent::TextDelta { delta } => yield Ok(delta),
                MessageEvent::Done { .. } => break,
                MessageEvent::Error { message } => {
                    yield Err(Error::Stream(message));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_chunks_stops_at_done() {
        let events: MessageEventStream = Box::pin(tokio_stream::iter(vec![
            MessageEvent::TextDelta { delta: "{\"a\"".into() },
            MessageEvent::TextDelta { delta: ": 1}".into() },
            MessageEvent::Done {
                text: "{\"a\": 1}".into(),
                finish_reason: Some("stop".into()),
            },
            MessageEvent::TextDelta { delta: "ignored".into() },
        ]));
        let chunks: Vec<String> = text_chunks(events)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["{\"a\"".to_string(), ": 1}".to_string()]);
    }

    #[tokio::test]
    async fn test_text_chunks_ends_with_the_error() {
        let events: MessageEventStream = Box::pin(tokio_stream::iter(vec![
            MessageEvent::TextDelta { delta: "{".into() },
            MessageEvent::Error {
                message: "SSE error: reset".into(),
            },
            MessageEvent::TextDelta { delta: "}".into() },
        ]));
        let chunks: Vec<Result<String>> = text_chunks(events).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_deref().unwrap(), "{");
        assert!(matches!(&chunks[1], Err(Error::Stream(m)) if m == "SSE error: reset"));
    }

    #[test]
    fn test_terminal_events() {
        assert!(MessageEvent::Error { message: String::new() }.is_terminal());
        assert!(!MessageEvent::TextDelta { delta: String::new() }.is_terminal());
    }
}
