//! Scripted transport shared by the agent and controller tests

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_ai::{ChatMessage, ChatModel, DecodedField};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    Error, Result,
    transport::{FieldStream, Transport},
};

/// `(delay_ms, item)` pairs streamed for one turn
pub type Script = Vec<(u64, Result<DecodedField>)>;

/// Streams queued scripts in order; fails once they run out
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Content of the final message of the `call`th request
    pub fn last_user_message(&self, call: usize) -> String {
        self.calls.lock()[call]
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        _model: &ChatModel,
        messages: Vec<ChatMessage>,
        _cancel: CancellationToken,
    ) -> Result<FieldStream> {
        self.calls.lock().push(messages);
        let script = self.scripts.lock().pop_front();
        let Some(script) = script else {
            return Err(Error::Ai(parley_ai::Error::UnexpectedResponse(
                "no script".into(),
            )));
        };
        Ok(Box::pin(async_stream::stream! {
            for (delay, item) in script {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let failed = item.is_err();
                yield item;
                if failed {
                    break;
                }
            }
        }))
    }
}

pub fn field(key: &str, value: &str) -> Result<DecodedField> {
    Ok(DecodedField::new(key, value))
}

/// A stream that breaks off the way a dropped connection does
pub fn broken_stream() -> Result<DecodedField> {
    Err(Error::Ai(parley_ai::Error::Stream(
        "stream ended before the answer finished".into(),
    )))
}
