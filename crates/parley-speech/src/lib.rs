//! parley-speech: voices and ears for the chatbot
//!
//! A [`SpeechService`] turns text into audio through a VOICEVOX-compatible
//! engine and plays it on a single queue; a [`RecognitionBuffer`] holds what
//! the user most recently said.

pub mod engine;
pub mod error;
pub mod player;
pub mod recognition;
pub mod service;
pub mod speaker;
pub mod stdin;

pub use engine::{SynthesisClient, SynthesisEngine, Synthesizer};
pub use error::{Error, Result};
pub use player::{AudioPlayer, CommandPlayer};
pub use recognition::RecognitionBuffer;
pub use service::{SpeechService, Voice, split_sentences};
pub use speaker::Speaker;
pub use stdin::StdinRecognizer;
