//! Interrupt-driven turn taking between the recognizer and the agent

use parley_speech::RecognitionBuffer;
use std::time::Duration;
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{Result, agent::Agent, handle::TurnStatus};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Silence after the last recognition before a reply starts
    pub response_start_threshold: Duration,
    /// Silence after the last completed turn before everything is reset
    pub idle_reset: Duration,
    /// Pause between deciding to respond and interrupting the agent
    pub settle_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            response_start_threshold: Duration::from_secs(1),
            idle_reset: Duration::from_secs(240),
            settle_delay: Duration::from_millis(200),
        }
    }
}

/// Extension points around each turn
pub trait TurnHooks: Send + Sync {
    /// Rewrite the recognized text before it is sent to the agent
    fn handle_user_input(&self, text: String) -> String {
        text
    }

    /// Called after a turn completes without interruption
    fn handle_agent_output(&self, _output: Option<&str>) {}
}

/// Hooks that change nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TurnHooks for NoHooks {}

enum Wake {
    Paused,
    Idle,
    Stop,
}

/// Drives an [`Agent`] from a [`RecognitionBuffer`].
///
/// Waits for the speaker to pause, answers, and keeps watching the recognizer
/// while the answer plays. If the transcript changes mid-answer the turn is
/// cancelled and the next reply is sent as an update of the interrupted one.
pub struct TurnController<H = NoHooks> {
    agent: Agent,
    recognition: RecognitionBuffer,
    config: ControllerConfig,
    hooks: H,
    recognition_updated: bool,
    last_conversation: Instant,
    /// Recognition revision the last reply was started for
    last_responded: u64,
}

impl TurnController<NoHooks> {
    pub fn new(agent: Agent, recognition: RecognitionBuffer) -> Self {
        Self::with_hooks(agent, recognition, NoHooks)
    }
}

impl<H: TurnHooks> TurnController<H> {
    pub fn with_hooks(agent: Agent, recognition: RecognitionBuffer, hooks: H) -> Self {
        let last_responded = recognition.revision();
        Self {
            agent,
            recognition,
            config: ControllerConfig::default(),
            hooks,
            recognition_updated: false,
            last_conversation: Instant::now(),
            last_responded,
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn into_agent(self) -> Agent {
        self.agent
    }

    /// Whether the next reply continues an interrupted turn
    pub fn is_recognition_updated(&self) -> bool {
        self.recognition_updated
    }

    /// Run until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut revisions = self.recognition.subscribe();
        self.last_conversation = Instant::now();
        tracing::debug!("turn controller started");

        loop {
            self.reset_if_idle().await?;

            match self.wait_for_pause(&mut revisions, &cancel).await {
                Wake::Stop => break,
                Wake::Idle => continue,
                Wake::Paused => {}
            }

            let (revision, latest) = self.recognition.snapshot();
            self.last_responded = revision;
            let Some(raw) = latest else {
                continue;
            };
            let text = self.hooks.handle_user_input(raw.clone());
            self.respond(&raw, &text, &mut revisions, &cancel).await?;

            if cancel.is_cancelled() {
                break;
            }
        }

        self.agent.interrupt_speech();
        self.agent.stop_chat_thread();
        tracing::debug!("turn controller stopped");
        Ok(())
    }

    /// Reset the agent and the recognizer once `idle_reset` has passed since
    /// the last completed turn.
    pub async fn reset_if_idle(&mut self) -> Result<bool> {
        if self.last_conversation.elapsed() < self.config.idle_reset {
            return Ok(false);
        }
        tracing::debug!(
            "{:?} since the last conversation, resetting",
            self.config.idle_reset
        );
        self.last_conversation = Instant::now();
        self.agent.reset().await?;
        self.last_responded = self.recognition.reset();
        Ok(true)
    }

    /// When an unanswered transcript becomes due for a reply
    fn pause_deadline(&self) -> Option<Instant> {
        if self.recognition.revision() == self.last_responded {
            return None;
        }
        self.recognition
            .last_recognized()
            .map(|at| at + self.config.response_start_threshold)
    }

    async fn wait_for_pause(
        &self,
        revisions: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
    ) -> Wake {
        loop {
            let now = Instant::now();
            let idle_deadline = self.last_conversation + self.config.idle_reset;
            if now >= idle_deadline {
                return Wake::Idle;
            }
            let pause_deadline = self.pause_deadline();
            if pause_deadline.is_some_and(|d| now >= d) {
                return Wake::Paused;
            }
            let deadline = pause_deadline.map_or(idle_deadline, |d| d.min(idle_deadline));

            tokio::select! {
                _ = cancel.cancelled() => return Wake::Stop,
                _ = tokio::time::sleep_until(deadline) => {}
                changed = revisions.changed() => {
                    if changed.is_err() {
                        return Wake::Stop;
                    }
                }
            }
        }
    }

    async fn respond(
        &mut self,
        raw: &str,
        text: &str,
        revisions: &mut watch::Receiver<u64>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::time::sleep(self.config.settle_delay).await;
        if text.trim().is_empty() {
            return Ok(());
        }

        tracing::debug!("responding to {:?}", text);
        self.agent.interrupt_speech();
        self.agent.stop_chat_thread();
        let turn = if self.recognition_updated {
            self.agent.update_chatting(text).await
        } else {
            self.agent.start_chatting(text).await
        };

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                status = turn.wait() => break status,
                changed = revisions.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    if self.recognition.latest().as_deref() != Some(raw) {
                        tracing::debug!("user resumed speaking, cancelling turn {}", turn.id());
                        self.agent.interrupt_speech();
                        self.agent.cancel_chatting().await;
                        self.recognition_updated = true;
                        return Ok(());
                    }
                }
            }
        };

        if status == TurnStatus::Completed {
            tracing::debug!("turn {} finished", turn.id());
            self.hooks
                .handle_agent_output(self.agent.recent_output().as_deref());
            self.last_conversation = Instant::now();
            self.last_responded = self.recognition.reset();
            self.recognition_updated = false;
        }
        Ok(())
    }
}
