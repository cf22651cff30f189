//! Shared speech service: one synthesis task and one playback task
//!
//! Every [`Voice`] handed out by a [`SpeechService`] feeds the same queue, so
//! lines from different characters never overlap. Synthesis of the next piece
//! runs while the current piece plays.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{AudioPlayer, Error, Result, Speaker, Synthesizer};

/// Characters after which text is cut into separately synthesised pieces
pub const SPLIT_CHARACTERS: &[char] = &['。', '？', '!', '…', '?', '.'];

/// Clips synthesised ahead of playback
const CLIP_LOOKAHEAD: usize = 4;

struct Request {
    text: String,
    speaker_id: u32,
    token: CancellationToken,
    done: oneshot::Sender<Result<()>>,
}

struct Clip {
    text: String,
    wav: Vec<u8>,
    token: CancellationToken,
    done: oneshot::Sender<Result<()>>,
}

struct Inner {
    requests: mpsc::UnboundedSender<Request>,
    generation: Mutex<CancellationToken>,
}

impl Inner {
    fn current_token(&self) -> CancellationToken {
        self.generation.lock().clone()
    }

    fn interrupt(&self) {
        let mut generation = self.generation.lock();
        generation.cancel();
        *generation = CancellationToken::new();
    }
}

/// Handle to the speech queue; cheap to clone
#[derive(Clone)]
pub struct SpeechService {
    inner: Arc<Inner>,
}

impl SpeechService {
    /// Start the background tasks. Must be called inside a tokio runtime.
    pub fn spawn(synthesizer: Arc<dyn Synthesizer>, player: Arc<dyn AudioPlayer>) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (clips, clip_rx) = mpsc::channel(CLIP_LOOKAHEAD);

        tokio::spawn(synthesis_loop(synthesizer, request_rx, clips));
        tokio::spawn(playback_loop(player, clip_rx));

        Self {
            inner: Arc::new(Inner {
                requests,
                generation: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// A speaker handle bound to one engine speaker id
    pub fn voice(&self, speaker_id: u32) -> Voice {
        Voice {
            inner: self.inner.clone(),
            speaker_id,
        }
    }

    /// Queue `text` for `speaker_id` and wait until it has been played
    pub async fn speak(&self, text: &str, speaker_id: u32) -> Result<()> {
        speak_pieces(&self.inner, text, speaker_id).await
    }

    /// Drop everything queued and stop the clip that is playing
    pub fn interrupt(&self) {
        tracing::debug!("speech interrupted");
        self.inner.interrupt();
    }
}

/// One character's voice on a shared [`SpeechService`]
#[derive(Clone)]
pub struct Voice {
    inner: Arc<Inner>,
    speaker_id: u32,
}

impl Voice {
    pub fn speaker_id(&self) -> u32 {
        self.speaker_id
    }
}

#[async_trait]
impl Speaker for Voice {
    async fn speak(&self, text: &str) -> Result<()> {
        speak_pieces(&self.inner, text, self.speaker_id).await
    }

    fn interrupt(&self) {
        self.inner.interrupt();
    }
}

async fn speak_pieces(inner: &Inner, text: &str, speaker_id: u32) -> Result<()> {
    let pieces = split_sentences(text);
    if pieces.is_empty() {
        return Ok(());
    }

    let token = inner.current_token();
    let mut pending = Vec::with_capacity(pieces.len());
    for text in pieces {
        let (done, rx) = oneshot::channel();
        inner
            .requests
            .send(Request {
                text,
                speaker_id,
                token: token.clone(),
                done,
            })
            .map_err(|_| Error::ServiceStopped)?;
        pending.push(rx);
    }

    for rx in pending {
        rx.await.map_err(|_| Error::ServiceStopped)??;
    }
    Ok(())
}

async fn synthesis_loop(
    synthesizer: Arc<dyn Synthesizer>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    clips: mpsc::Sender<Clip>,
) {
    while let Some(request) = requests.recv().await {
        if request.token.is_cancelled() {
            let _ = request.done.send(Ok(()));
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = request.token.cancelled() => None,
            r = synthesizer.synthesize(&request.text, request.speaker_id) => Some(r),
        };

        match result {
            None => {
                let _ = request.done.send(Ok(()));
            }
            Some(Err(e)) => {
                tracing::warn!("synthesis failed for {:?}: {}", request.text, e);
                let _ = request.done.send(Err(e));
            }
            Some(Ok(wav)) => {
                let clip = Clip {
                    text: request.text,
                    wav,
                    token: request.token,
                    done: request.done,
                };
                if clips.send(clip).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("synthesis task stopped");
}

async fn playback_loop(player: Arc<dyn AudioPlayer>, mut clips: mpsc::Receiver<Clip>) {
    while let Some(clip) = clips.recv().await {
        if clip.token.is_cancelled() {
            let _ = clip.done.send(Ok(()));
            continue;
        }

        tracing::debug!("play: {:?}", clip.text);
        let result = player.play(&clip.wav, &clip.token).await;
        if let Err(ref e) = result {
            tracing::warn!("playback failed: {}", e);
        }
        let _ = clip.done.send(result);
    }
    tracing::debug!("playback task stopped");
}

/// Cut text after each split character; runs of split characters stay together.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = SPLIT_CHARACTERS.contains(&c)
            && !chars.peek().is_some_and(|next| SPLIT_CHARACTERS.contains(next));
        if at_boundary {
            push_piece(&mut pieces, &mut current);
        }
    }
    push_piece(&mut pieces, &mut current);
    pieces
}

fn push_piece(pieces: &mut Vec<String>, current: &mut String) {
    let piece = current.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_string());
    }
    current.clear();
}
