//! Error types for parley-speech

use thiserror::Error;

/// Result type alias using parley-speech Error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Could not reach the synthesis engine
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The synthesis engine rejected a request
    #[error("synthesis engine error ({status}): {message}")]
    Engine { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The audio player exited unsuccessfully
    #[error("player failed: {0}")]
    Player(String),

    /// The speech service's background task is gone
    #[error("speech service stopped")]
    ServiceStopped,
}
