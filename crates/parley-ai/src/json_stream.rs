//! Incremental decoding of a streamed JSON object into top-level fields.
//!
//! The model is asked to answer with a single flat JSON object such as
//! `{"zundamon": "...", "metan": "...", "emotion": "..."}`. Waiting for the
//! closing brace would delay speech by the whole generation, so every comma
//! that arrives is treated as a candidate field separator: the buffer is closed
//! with a synthetic `}` and parsed. A successful parse means the comma really
//! separated two fields and the fields seen since the last emission are
//! complete. A failed parse means the comma sits inside a string value and the
//! buffer keeps growing.
//!
//! Values must not contain nested objects or arrays: a comma inside a nested
//! value can close the buffer early.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// One completed top-level field of the streamed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedField {
    pub key: String,
    pub value: Value,
}

impl DecodedField {
    /// Create a field
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The value as display text (strings verbatim, other scalars as JSON)
    pub fn as_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// The field as a single-entry JSON object
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(self.key.clone(), self.value.clone());
        map
    }
}

/// What was left in the buffer when the stream ended
#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// The remaining buffer closed the object
    Complete(Vec<DecodedField>),
    /// Nothing was pending
    Empty,
    /// The remaining buffer is not a complete object; it is dropped
    Truncated { remainder: String },
}

impl FinishOutcome {
    /// Fields recovered from the tail, if any
    pub fn into_fields(self) -> Vec<DecodedField> {
        match self {
            FinishOutcome::Complete(fields) => fields,
            FinishOutcome::Empty | FinishOutcome::Truncated { .. } => Vec::new(),
        }
    }
}

/// Push-based decoder for one streamed object
#[derive(Debug, Default)]
pub struct FieldDecoder {
    buffer: String,
    emitted: usize,
}

impl FieldDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// The raw text not yet attributed to an emitted field
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed a fragment; returns the fields it completed, in object order.
    pub fn push(&mut self, chunk: &str) -> Vec<DecodedField> {
        let mut completed = Vec::new();
        let mut parts = chunk.split(',').peekable();

        while let Some(part) = parts.next() {
            self.buffer.push_str(part);
            if parts.peek().is_none() {
                break;
            }

            // A comma follows `part`.
            match close_prefix(&self.buffer) {
                Some(fields) => {
                    tracing::debug!("decoded {} field(s) at separator", fields.len());
                    self.emitted += fields.len();
                    completed.extend(fields);
                    self.buffer.clear();
                    self.buffer.push('{');
                }
                None => self.buffer.push(','),
            }
        }

        completed
    }

    /// Consume the decoder at end of stream.
    pub fn finish(mut self) -> FinishOutcome {
        let rest = self.buffer.trim();
        if rest.is_empty() || rest == "{" {
            return FinishOutcome::Empty;
        }

        match serde_json::from_str::<Map<String, Value>>(rest) {
            Ok(map) if map.is_empty() => FinishOutcome::Empty,
            Ok(map) => {
                let fields = into_fields(map);
                self.emitted += fields.len();
                FinishOutcome::Complete(fields)
            }
            Err(e) => {
                tracing::warn!(
                    "streamed object ended incomplete, dropping tail ({}): {:?}",
                    e,
                    rest
                );
                FinishOutcome::Truncated {
                    remainder: rest.to_string(),
                }
            }
        }
    }
}

/// Try to read `prefix` as a complete object once a closing brace is added.
fn close_prefix(prefix: &str) -> Option<Vec<DecodedField>> {
    let mut candidate = String::with_capacity(prefix.len() + 1);
    candidate.push_str(prefix);
    candidate.push('}');

    match serde_json::from_str::<Map<String, Value>>(&candidate) {
        Ok(map) if !map.is_empty() => Some(into_fields(map)),
        _ => None,
    }
}

fn into_fields(map: Map<String, Value>) -> Vec<DecodedField> {
    map.into_iter()
        .map(|(key, value)| DecodedField { key, value })
        .collect()
}

/// Decode a stream of text fragments into a lazy stream of completed fields.
///
/// The returned stream is single-pass and ends after the tail of the object
/// has been handled; a truncated tail is logged and yields nothing. A failed
/// chunk is passed on as the last item and the pending buffer is dropped.
pub fn decode_fields<S>(chunks: S) -> impl Stream<Item = Result<DecodedField>> + Send
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = FieldDecoder::new();
        let mut chunks = Box::pin(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(chunk) => {
                    for field in decoder.push(&chunk) {
                        yield Ok(field);
                    }
                }
                Err(e) => {
                    tracing::debug!("dropping undecoded buffer: {:?}", decoder.pending());
                    yield Err(e);
                    return;
                }
            }
        }

        for field in decoder.finish().into_fields() {
            yield Ok(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    fn feed_all(decoder: &mut FieldDecoder, chunks: &[&str]) -> Vec<DecodedField> {
        chunks.iter().flat_map(|c| decoder.push(c)).collect()
    }

    fn whole(object: &str) -> Vec<DecodedField> {
        let map: Map<String, Value> = serde_json::from_str(object).unwrap();
        into_fields(map)
    }

    fn char_by_char(object: &str) -> Vec<DecodedField> {
        let mut decoder = FieldDecoder::new();
        let mut buf = [0u8; 4];
        let mut fields: Vec<DecodedField> = object
            .chars()
            .flat_map(|c| decoder.push(c.encode_utf8(&mut buf)))
            .collect();
        fields.extend(decoder.finish().into_fields());
        fields
    }

    #[test]
    fn test_emits_each_field_when_separator_arrives() {
        let mut decoder = FieldDecoder::new();
        assert!(decoder.push("{\"zundamon\": \"hello\"").is_empty());

        let fields = decoder.push(", \"metan\": \"hi");
        assert_eq!(fields, vec![DecodedField::new("zundamon", "hello")]);
        assert_eq!(decoder.pending(), "{ \"metan\": \"hi");

        assert!(decoder.push(" there\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            FinishOutcome::Complete(vec![DecodedField::new("metan", "hi there")])
        );
    }

    #[test]
    fn test_comma_inside_string_is_not_a_separator() {
        let mut decoder = FieldDecoder::new();
        let fields = feed_all(&mut decoder, &["{\"response\": \"hi", ",", " there\"}"]);
        assert!(fields.is_empty());
        assert_eq!(
            decoder.finish().into_fields(),
            vec![DecodedField::new("response", "hi, there")]
        );
    }

    #[test]
    fn test_several_separators_in_one_chunk() {
        let mut decoder = FieldDecoder::new();
        let fields = decoder.push("{\"a\": \"1, 2\", \"b\": \"3\", \"c\": \"4\"}");
        assert_eq!(
            fields,
            vec![DecodedField::new("a", "1, 2"), DecodedField::new("b", "3")]
        );
        assert_eq!(decoder.emitted(), 2);
        assert_eq!(
            decoder.finish().into_fields(),
            vec![DecodedField::new("c", "4")]
        );
    }

    #[test]
    fn test_char_by_char_matches_whole_object() {
        let objects = [
            r#"{"zundamon": "こんにちは、元気なのだ？", "metan": "久しぶりね", "emotion": "嬉しい"}"#,
            r#"{"response": "hi, there", "emotion": "calm"}"#,
            r#"{"a": "say \"yes, no\"", "b": "x,,y", "c": ""}"#,
            r#"{"only": "one field, with, commas"}"#,
            "{\n  \"line\": \"first\",\n  \"count\": 3,\n  \"flag\": true\n}",
        ];
        for object in objects {
            assert_eq!(char_by_char(object), whole(object), "object: {object}");
        }
    }

    #[test]
    fn test_repeated_key_is_emitted_again() {
        let fields = char_by_char(r#"{"zundamon": "one", "metan": "two", "zundamon": "three"}"#);
        let keys: Vec<&str> = fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["zundamon", "metan", "zundamon"]);
        assert_eq!(fields[2].as_text(), "three");
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let mut decoder = FieldDecoder::new();
        let fields = decoder.push("{\"a\": \"done\", \"b\": \"cut of");
        assert_eq!(fields, vec![DecodedField::new("a", "done")]);
        match decoder.finish() {
            FinishOutcome::Truncated { remainder } => {
                assert_eq!(remainder, "{ \"b\": \"cut of");
            }
            other => panic!("expected truncated tail, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_without_pending_fields() {
        let mut decoder = FieldDecoder::new();
        decoder.push("{\"a\": \"x\",");
        assert_eq!(decoder.finish(), FinishOutcome::Empty);
        assert_eq!(FieldDecoder::new().finish(), FinishOutcome::Empty);
    }

    #[test]
    fn test_as_text_renders_scalars() {
        assert_eq!(DecodedField::new("n", json!(3)).as_text(), "3");
        assert_eq!(DecodedField::new("s", "text").as_text(), "text");
        assert_eq!(
            DecodedField::new("k", "v").to_map(),
            json!({"k": "v"}).as_object().cloned().unwrap()
        );
    }

    #[tokio::test]
    async fn test_decode_fields_stream() {
        let chunks = futures::stream::iter(
            ["{\"zun", "damon\": \"a, b\"", ", \"emo", "tion\": \"joy\"}"]
                .into_iter()
                .map(|c| Ok(c.to_string())),
        );
        let fields: Vec<DecodedField> = decode_fields(chunks)
            .map(|field| field.unwrap())
            .collect()
            .await;
        assert_eq!(
            fields,
            vec![
                DecodedField::new("zundamon", "a, b"),
                DecodedField::new("emotion", "joy"),
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_fields_passes_failure_through() {
        let chunks = futures::stream::iter(vec![
            Ok("{\"ai\": \"one\", \"emo".to_string()),
            Err(Error::Stream("connection reset".into())),
            Ok("tion\": \"joy\"}".to_string()),
        ]);
        let items: Vec<Result<DecodedField>> = decode_fields(chunks).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &DecodedField::new("ai", "one"));
        assert!(matches!(items[1], Err(Error::Stream(_))));
    }
}
