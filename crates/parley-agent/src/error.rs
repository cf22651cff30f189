//! Error types for parley-agent

use thiserror::Error;

/// Result type alias using parley-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model API layer
    #[error(transparent)]
    Ai(#[from] parley_ai::Error),

    /// An error from speech synthesis or playback
    #[error(transparent)]
    Speech(#[from] parley_speech::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persona file could not be parsed
    #[error("invalid persona: {0}")]
    Persona(#[from] toml::de::Error),

    /// The turn was cancelled before the stream opened
    #[error("turn cancelled")]
    Cancelled,
}

impl Error {
    /// Check if retrying the same request might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            _ => false,
        }
    }
}
