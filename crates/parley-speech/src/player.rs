//! Audio playback through an external command

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Plays encoded audio
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play `wav`, returning early (with `Ok`) once `cancel` fires.
    async fn play(&self, wav: &[u8], cancel: &CancellationToken) -> Result<()>;
}

/// Hands each clip to a command-line player (`aplay`, `afplay`, `paplay`, ...)
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    temp_dir: PathBuf,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Parse a whitespace separated command line such as `"aplay -q"`
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().map(String::from);
        let program = words.next()?;
        Some(Self::new(program, words.collect()))
    }

    /// `afplay` on macOS, `aplay -q` elsewhere
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("afplay", Vec::new())
        } else {
            Self::new("aplay", vec!["-q".to_string()])
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, path: &Path, cancel: &CancellationToken) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Player(format!("failed to start {}: {}", self.program, e)))?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Player(format!("{} exited with {}", self.program, status)))
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("playback interrupted");
                if let Err(e) = child.kill().await {
                    tracing::debug!("failed to stop player: {}", e);
                }
                Ok(())
            }
        }
    }
}

impl Default for CommandPlayer {
    fn default() -> Self {
        Self::platform_default()
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, wav: &[u8], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let path = self
            .temp_dir
            .join(format!("parley-{}.wav", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, wav).await?;

        let result = self.run(&path, cancel).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!("failed to remove {}: {}", path.display(), e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let player = CommandPlayer::from_command_line("paplay --volume 40000").unwrap();
        assert_eq!(player.program(), "paplay");
        assert_eq!(player.args, vec!["--volume", "40000"]);
        assert!(CommandPlayer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_plays_nothing() {
        let player = CommandPlayer::new("definitely-not-a-player", Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(player.play(b"RIFF", &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_program_is_player_error() {
        let player = CommandPlayer::new("definitely-not-a-player", Vec::new());
        let err = player
            .play(b"RIFF", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Player(_)));
    }
}
