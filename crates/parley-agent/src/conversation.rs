//! Conversation history with same-role coalescing

use parley_ai::{ChatMessage, DecodedField, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content of one turn: plain text, or the key/value fields the model produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Fields(Map<String, Value>),
}

impl TurnContent {
    pub fn is_empty(&self) -> bool {
        match self {
            TurnContent::Text(text) => text.is_empty(),
            TurnContent::Fields(fields) => fields.is_empty(),
        }
    }

    /// The content as it is sent back to the model
    pub fn render(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Fields(fields) => Value::Object(fields.clone()).to_string(),
        }
    }
}

impl From<&str> for TurnContent {
    fn from(text: &str) -> Self {
        TurnContent::Text(text.to_string())
    }
}

impl From<String> for TurnContent {
    fn from(text: String) -> Self {
        TurnContent::Text(text)
    }
}

impl From<DecodedField> for TurnContent {
    fn from(field: DecodedField) -> Self {
        let mut fields = Map::new();
        fields.insert(field.key, field.value);
        TurnContent::Fields(fields)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

/// Ordered user/assistant turns; the persona prompt is kept separately.
///
/// Consecutive writes with the same role extend the last turn instead of
/// starting a new one, so a streamed answer accumulates into one assistant
/// turn until the next user input.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
    version: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append or coalesce; returns whether the content was non-empty.
    pub fn put(&mut self, role: Role, content: impl Into<TurnContent>) -> bool {
        let content = content.into();
        let non_empty = !content.is_empty();
        tracing::debug!("history put: {} {:?}", role.as_str(), content);

        let unmerged = match (self.turns.last_mut(), content) {
            (Some(last), content) if last.role == role => match (&mut last.content, content) {
                (TurnContent::Fields(existing), TurnContent::Fields(fields)) => {
                    existing.extend(fields);
                    None
                }
                (TurnContent::Text(existing), TurnContent::Text(text)) => {
                    existing.push_str(&text);
                    None
                }
                (_, content) => Some(content),
            },
            (_, content) => Some(content),
        };
        if let Some(content) = unmerged {
            self.turns.push(Turn { role, content });
        }

        self.version += 1;
        non_empty
    }

    /// Remove the last turn if it is a user turn.
    pub fn rollback_last_user(&mut self) -> Option<Turn> {
        if self.turns.last().is_some_and(|t| t.role == Role::User) {
            self.version += 1;
            return self.turns.pop();
        }
        None
    }

    /// Whether the most recent turn came from the assistant
    pub fn is_responded(&self) -> bool {
        self.turns.last().is_some_and(|t| t.role == Role::Assistant)
    }

    /// The latest assistant turn, rendered as text
    pub fn recent_output(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.render())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.version += 1;
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Monotonic counter bumped on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Request messages: the system prompt followed by every turn
    pub fn to_messages(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(self.turns.iter().map(|t| ChatMessage {
            role: t.role,
            content: t.content.render(),
        }));
        messages
    }
}
