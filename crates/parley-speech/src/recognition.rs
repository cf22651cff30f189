//! Latest-transcript store shared between a recognizer and the turn controller

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct State {
    latest: Option<String>,
    last_recognized: Option<Instant>,
    revision: u64,
}

/// Holds the most recent transcript and when it arrived.
///
/// Recognizers call [`push`](Self::push) with the full transcript of the
/// current utterance each time it is revised. Every push bumps a revision
/// counter that consumers can [`subscribe`](Self::subscribe) to.
#[derive(Clone)]
pub struct RecognitionBuffer {
    state: Arc<Mutex<State>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for RecognitionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionBuffer {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(State::default())),
            revision: Arc::new(revision),
        }
    }

    /// Replace the latest transcript
    pub fn push(&self, transcript: impl Into<String>) {
        let mut state = self.state.lock();
        self.store(&mut *state, transcript.into());
    }

    /// Extend the latest transcript with a further fragment
    pub fn append(&self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        let combined = match state.latest.as_deref() {
            Some(previous) if !previous.is_empty() => format!("{previous} {fragment}"),
            _ => fragment.to_string(),
        };
        self.store(&mut *state, combined);
    }

    // The watch value is published under the state lock so it never runs
    // ahead of or behind `State::revision`.
    fn store(&self, state: &mut State, transcript: String) {
        tracing::debug!("recognized: {:?}", transcript);
        state.latest = Some(transcript);
        state.last_recognized = Some(Instant::now());
        state.revision += 1;
        self.revision.send_replace(state.revision);
    }

    pub fn latest(&self) -> Option<String> {
        self.state.lock().latest.clone()
    }

    /// The current revision and its transcript, read together
    pub fn snapshot(&self) -> (u64, Option<String>) {
        let state = self.state.lock();
        (state.revision, state.latest.clone())
    }

    /// When the latest transcript arrived
    pub fn last_recognized(&self) -> Option<Instant> {
        self.state.lock().last_recognized
    }

    pub fn time_since_last(&self) -> Option<Duration> {
        self.last_recognized().map(|t| t.elapsed())
    }

    /// True once `threshold` has passed since the last transcript;
    /// false if nothing has been recognised since the last reset.
    pub fn is_timed_out(&self, threshold: Duration) -> bool {
        self.time_since_last().is_some_and(|elapsed| elapsed > threshold)
    }

    /// Forget the current transcript and return the revision it had.
    /// Subscribers are not notified.
    pub fn reset(&self) -> u64 {
        let mut state = self.state.lock();
        state.latest = None;
        state.last_recognized = None;
        state.revision
    }

    /// Current revision number
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Receiver that changes every time a transcript is pushed
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_requires_a_recognition() {
        let buffer = RecognitionBuffer::new();
        assert!(!buffer.is_timed_out(Duration::ZERO));
        assert!(buffer.time_since_last().is_none());

        buffer.push("hello");
        assert!(!buffer.is_timed_out(Duration::from_secs(1)));
        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(buffer.is_timed_out(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_without_notifying() {
        let buffer = RecognitionBuffer::new();
        let mut rx = buffer.subscribe();
        buffer.push("hello");
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        buffer.reset();
        assert_eq!(buffer.latest(), None);
        assert!(!buffer.is_timed_out(Duration::ZERO));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_snapshot_pairs_revision_with_text() {
        let buffer = RecognitionBuffer::new();
        assert_eq!(buffer.snapshot(), (0, None));

        buffer.push("hello");
        buffer.push("hello there");
        assert_eq!(buffer.snapshot(), (2, Some("hello there".to_string())));
        assert_eq!(*buffer.subscribe().borrow(), 2);

        assert_eq!(buffer.reset(), 2);
        assert_eq!(buffer.snapshot(), (2, None));
    }

    #[test]
    fn test_snapshot_is_consistent_under_concurrent_pushes() {
        let buffer = RecognitionBuffer::new();
        let writer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 1..=1000u64 {
                    buffer.push(i.to_string());
                }
            })
        };
        for _ in 0..1000 {
            let (revision, latest) = buffer.snapshot();
            let expected = (revision > 0).then(|| revision.to_string());
            assert_eq!(latest, expected);
        }
        writer.join().unwrap();
        assert_eq!(buffer.snapshot(), (1000, Some("1000".to_string())));
    }

    #[test]
    fn test_append_extends_transcript() {
        let buffer = RecognitionBuffer::new();
        buffer.append("  ");
        assert_eq!(buffer.latest(), None);
        buffer.append("I was thinking");
        buffer.append("about lunch");
        assert_eq!(buffer.latest().as_deref(), Some("I was thinking about lunch"));
        assert_eq!(buffer.revision(), 2);
    }
}
