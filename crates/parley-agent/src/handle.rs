//! A cloneable handle on one agent turn.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// No turn has been started
    Idle,
    Generating,
    /// The response stream was exhausted without interruption
    Completed,
    /// Stopped by `stop_chat_thread`
    Interrupted,
    /// Stopped by `cancel_chatting`, with the user input rolled back
    Cancelled,
}

impl TurnStatus {
    /// Whether the turn was stopped before finishing
    pub fn was_stopped(&self) -> bool {
        matches!(self, TurnStatus::Interrupted | TurnStatus::Cancelled)
    }
}

/// A cloneable handle on one turn.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. The cancellation token
/// and status are scoped to this turn; the next turn gets fresh ones.
#[derive(Clone)]
pub struct TurnHandle {
    id: u64,
    cancel: CancellationToken,
    status: Arc<watch::Sender<TurnStatus>>,
    responded: Arc<AtomicBool>,
}

impl TurnHandle {
    pub(crate) fn new(id: u64) -> Self {
        let (status, _) = watch::channel(TurnStatus::Generating);
        Self {
            id,
            cancel: CancellationToken::new(),
            status: Arc::new(status),
            responded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TurnStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<TurnStatus> {
        self.status.subscribe()
    }

    /// Get the cancellation token (for callers that need direct access).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether any assistant output of this turn reached the history
    pub fn responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Wait until the turn leaves `Generating`.
    ///
    /// A turn whose worker failed stays `Generating`, so this never resolves
    /// for it; callers race it against their own wake-ups.
    pub async fn wait(&self) -> TurnStatus {
        let mut rx = self.status.subscribe();
        match rx.wait_for(|s| *s != TurnStatus::Generating).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    /// Stop the turn; no effect once it has completed.
    pub fn interrupt(&self) {
        let changed = self.status.send_if_modified(|s| {
            if *s == TurnStatus::Generating {
                *s = TurnStatus::Interrupted;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!("turn {} interrupted", self.id);
            self.cancel.cancel();
        }
    }

    /// Stop the turn and mark it cancelled; no effect once it has completed.
    pub(crate) fn cancel(&self) -> bool {
        let changed = self.status.send_if_modified(|s| {
            if matches!(*s, TurnStatus::Generating | TurnStatus::Interrupted) {
                *s = TurnStatus::Cancelled;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!("turn {} cancelled", self.id);
            self.cancel.cancel();
        }
        changed
    }

    pub(crate) fn complete(&self) -> bool {
        self.status.send_if_modified(|s| {
            if *s == TurnStatus::Generating && !self.cancel.is_cancelled() {
                *s = TurnStatus::Completed;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_responded(&self) {
        self.responded.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_after_completion_is_ignored() {
        let turn = TurnHandle::new(1);
        assert!(turn.complete());
        turn.interrupt();
        assert_eq!(turn.status(), TurnStatus::Completed);
        assert!(!turn.is_cancelled());
    }

    #[test]
    fn test_cancel_after_interrupt() {
        let turn = TurnHandle::new(1);
        turn.interrupt();
        assert_eq!(turn.status(), TurnStatus::Interrupted);
        assert!(turn.cancel());
        assert_eq!(turn.status(), TurnStatus::Cancelled);
        assert!(!turn.complete());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_interrupt() {
        let turn = TurnHandle::new(7);
        let waiter = tokio::spawn({
            let turn = turn.clone();
            async move { turn.wait().await }
        });
        turn.interrupt();
        assert_eq!(waiter.await.unwrap(), TurnStatus::Interrupted);
    }
}
