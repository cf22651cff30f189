//! The conversational agent: one persona, one history, one turn at a time

use futures::StreamExt;
use parking_lot::Mutex;
use parley_ai::{ChatMessage, ChatModel, DecodedField, Role};
use parley_speech::Speaker;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::{
    Result,
    conversation::{History, Turn},
    dialog_log::DialogLog,
    handle::{TurnHandle, TurnStatus},
    persona::Persona,
    transport::Transport,
};

/// Prefix marking an input that extends an interrupted turn
pub const UPDATED_PREFIX: &str = "updated: ";

/// Agent configuration
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Model to use
    pub model: ChatModel,
}

/// A character the agent can voice
pub struct CastMember {
    pub key: String,
    pub name: String,
    speaker: Option<Arc<dyn Speaker>>,
}

impl CastMember {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        speaker: Option<Arc<dyn Speaker>>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            speaker,
        }
    }
}

/// Ordered dispatch table from output keys to speakers.
///
/// Keys that name no member (an `emotion` tag, say) are kept in the history
/// but never voiced.
pub struct Cast {
    members: Vec<CastMember>,
    console: bool,
}

impl Cast {
    pub fn new(members: Vec<CastMember>) -> Self {
        Self {
            members,
            console: true,
        }
    }

    /// One member per persona character, paired with `speakers` in order.
    ///
    /// Characters beyond the supplied speakers are console-only.
    pub fn from_persona(persona: &Persona, speakers: Vec<Arc<dyn Speaker>>) -> Self {
        let mut speakers = speakers.into_iter();
        Self::new(
            persona
                .characters
                .iter()
                .map(|c| CastMember::new(&c.key, &c.name, speakers.next()))
                .collect(),
        )
    }

    /// Whether every line is echoed to stdout as `name: text`
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn find(&self, key: &str) -> Option<&CastMember> {
        self.members.iter().find(|m| m.key == key)
    }

    pub fn members(&self) -> &[CastMember] {
        &self.members
    }

    /// Stop every speaker
    pub fn interrupt(&self) {
        for speaker in self.members.iter().filter_map(|m| m.speaker.as_ref()) {
            speaker.interrupt();
        }
    }

    /// Voice `field` if its key names a member
    pub async fn perform(&self, field: &DecodedField) {
        let Some(member) = self.find(&field.key) else {
            return;
        };
        let text = field.as_text();
        if self.console {
            println!("{}: {}", member.name, text);
        }

        let spoken = match &member.speaker {
            Some(speaker) => match speaker.speak(&text).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("speaker for '{}' failed: {}", member.key, e);
                    false
                }
            },
            None => false,
        };
        if !spoken && !self.console {
            println!("{}: {}", member.name, text);
        }
    }
}

/// State shared between the agent and its turn workers
struct Shared {
    transport: Arc<dyn Transport>,
    model: ChatModel,
    system_prompt: String,
    cast: Cast,
    history: Mutex<History>,
    log: Option<DialogLog>,
}

impl Shared {
    fn snapshot(history: &History) -> (u64, Vec<Turn>) {
        (history.version(), history.turns().to_vec())
    }

    async fn save(&self, (version, turns): (u64, Vec<Turn>)) {
        if let Some(log) = &self.log {
            log.save(version, &self.system_prompt, &turns).await;
        }
    }
}

/// The main agent that drives turns against the transport
pub struct Agent {
    persona: Persona,
    shared: Arc<Shared>,
    current: Option<TurnHandle>,
    worker: Option<JoinHandle<()>>,
    next_id: u64,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        persona: Persona,
        cast: Cast,
        transport: Arc<dyn Transport>,
        config: AgentConfig,
    ) -> Self {
        let system_prompt = persona.system_prompt();
        Self {
            persona,
            shared: Arc::new(Shared {
                transport,
                model: config.model,
                system_prompt,
                cast,
                history: Mutex::new(History::new()),
                log: None,
            }),
            current: None,
            worker: None,
            next_id: 0,
        }
    }

    /// Snapshot the history to `log` after every mutation
    pub fn with_dialog_log(mut self, log: DialogLog) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.log = Some(log),
            None => tracing::warn!("dialog log must be attached before the first turn"),
        }
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn system_prompt(&self) -> &str {
        &self.shared.system_prompt
    }

    pub fn cast(&self) -> &Cast {
        &self.shared.cast
    }

    pub fn dialog_log(&self) -> Option<&DialogLog> {
        self.shared.log.as_ref()
    }

    /// Copy of the conversation so far
    pub fn history(&self) -> History {
        self.shared.history.lock().clone()
    }

    /// The latest assistant output, rendered as JSON text
    pub fn recent_output(&self) -> Option<String> {
        self.shared.history.lock().recent_output()
    }

    pub fn current_turn(&self) -> Option<&TurnHandle> {
        self.current.as_ref()
    }

    /// Status of the latest turn; `Idle` before the first one
    pub fn status(&self) -> TurnStatus {
        self.current
            .as_ref()
            .map_or(TurnStatus::Idle, TurnHandle::status)
    }

    /// Append `message` as a user turn and start generating a reply.
    ///
    /// A turn still in flight is interrupted and its worker awaited first, so
    /// at most one turn is generating at any time.
    pub async fn start_chatting(&mut self, message: &str) -> TurnHandle {
        self.finish_current().await;

        let (messages, snapshot) = {
            let mut history = self.shared.history.lock();
            history.put(Role::User, message);
            (
                history.to_messages(&self.shared.system_prompt),
                Shared::snapshot(&history),
            )
        };
        self.shared.save(snapshot).await;

        self.next_id += 1;
        let turn = TurnHandle::new(self.next_id);
        tracing::debug!("turn {} started: {:?}", turn.id(), message);

        self.worker = Some(tokio::spawn(run_turn(
            self.shared.clone(),
            turn.clone(),
            messages,
        )));
        self.current = Some(turn.clone());
        turn
    }

    /// Like [`Agent::start_chatting`], but marks the input as a continuation
    /// when the previous turn was stopped after some of its answer was heard.
    pub async fn update_chatting(&mut self, message: &str) -> TurnHandle {
        self.stop_chat_thread();
        let resumed = self
            .current
            .as_ref()
            .is_some_and(|t| t.status().was_stopped() && t.responded())
            && self.shared.history.lock().is_responded();

        if resumed {
            self.start_chatting(&format!("{}{}", UPDATED_PREFIX, message))
                .await
        } else {
            self.start_chatting(message).await
        }
    }

    /// Stop the current turn; the worker appends nothing further.
    pub fn stop_chat_thread(&self) {
        if let Some(turn) = &self.current {
            turn.interrupt();
        }
    }

    /// Alias for [`Agent::stop_chat_thread`]
    pub fn interrupt(&self) {
        self.stop_chat_thread();
    }

    /// Stop the current turn and drop its user input from the history.
    ///
    /// The input stays when part of the answer was already recorded, so the
    /// next input can be marked as a continuation.
    pub async fn cancel_chatting(&mut self) {
        let snapshot = {
            let mut history = self.shared.history.lock();
            // Under the history lock, so the worker cannot append after this.
            if let Some(turn) = &self.current {
                turn.cancel();
            }
            history
                .rollback_last_user()
                .map(|_| Shared::snapshot(&history))
        };
        if let Some(snapshot) = snapshot {
            self.shared.save(snapshot).await;
        }
    }

    /// Stop speech on every speaker
    pub fn interrupt_speech(&self) {
        self.shared.cast.interrupt();
    }

    /// Stop the current turn and forget the conversation
    pub async fn reset(&mut self) -> Result<()> {
        self.finish_current().await;
        let snapshot = {
            let mut history = self.shared.history.lock();
            history.clear();
            Shared::snapshot(&history)
        };
        self.shared.save(snapshot).await;
        tracing::debug!("agent reset");
        Ok(())
    }

    async fn finish_current(&mut self) {
        self.stop_chat_thread();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!("turn worker panicked: {}", e);
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop_chat_thread();
    }
}

async fn run_turn(shared: Arc<Shared>, turn: TurnHandle, messages: Vec<ChatMessage>) {
    let cancel = turn.cancel_token();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(false),
        result = drive(&shared, &turn, messages) => result,
    };

    match result {
        Ok(true) => {
            if turn.complete() {
                tracing::debug!("turn {} completed", turn.id());
            }
        }
        Ok(false) | Err(crate::Error::Cancelled) => {
            tracing::debug!("turn {} stopped: {:?}", turn.id(), turn.status());
        }
        // The status stays Generating; the controller wakes on new input.
        Err(e) => tracing::error!("turn {} failed: {}", turn.id(), e),
    }
}

/// Returns `Ok(true)` once the stream is exhausted without interruption.
async fn drive(shared: &Shared, turn: &TurnHandle, messages: Vec<ChatMessage>) -> Result<bool> {
    let cancel = turn.cancel_token();
    let mut fields = shared
        .transport
        .open(&shared.model, messages, cancel.clone())
        .await?;

    while let Some(field) = fields.next().await {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let field = field?;
        let snapshot = {
            let mut history = shared.history.lock();
            if cancel.is_cancelled() {
                return Ok(false);
            }
            history.put(Role::Assistant, field.clone());
            turn.mark_responded();
            Shared::snapshot(&history)
        };
        shared.save(snapshot).await;

        shared.cast.perform(&field).await;
        if cancel.is_cancelled() {
            return Ok(false);
        }
    }
    Ok(true)
}
