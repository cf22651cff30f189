//! parley-ai: hosted model clients
//!
//! Chat-completion streaming, incremental decoding of the model's JSON output
//! into key/value fields, and reference-image driven image generation.

pub mod error;
pub mod image;
pub mod json_stream;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use image::{ImageGenerator, ImageRequest, MAX_REFERENCE_IMAGES};
pub use json_stream::{DecodedField, FieldDecoder, FinishOutcome, decode_fields};
pub use stream::MessageEventStream;
pub use types::*;
