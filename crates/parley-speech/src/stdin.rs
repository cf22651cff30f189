//! Typed-text recognition source

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio_util::sync::CancellationToken;

use crate::{RecognitionBuffer, Result};

/// Feeds lines of text into a [`RecognitionBuffer`] as if they were heard.
///
/// Consecutive lines typed before the agent responds are joined into one
/// utterance, mirroring a streaming recognizer revising its transcript.
pub struct StdinRecognizer<R = BufReader<Stdin>> {
    reader: R,
}

impl StdinRecognizer {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for StdinRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: AsyncBufRead + Unpin> StdinRecognizer<R> {
    pub fn from_reader(reader: R) -> Self {
        Self { reader }
    }

    /// Read until end of input or cancellation
    pub async fn run(self, buffer: RecognitionBuffer, cancel: CancellationToken) -> Result<()> {
        let mut lines = self.reader.lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            match line {
                Some(line) => buffer.append(&line),
                None => {
                    tracing::debug!("recognition input closed");
                    break;
                }
            }
        }
        Ok(())
    }
}
