//! parley-agent: conversational agent and turn controller
//!
//! An [`Agent`] owns a persona and the conversation history and runs one
//! generation turn at a time, voicing each decoded field through its
//! [`Cast`]. The [`TurnController`] watches a recognition buffer and decides
//! when to start, interrupt or cancel a turn.

pub mod agent;
pub mod controller;
pub mod conversation;
pub mod dialog_log;
pub mod error;
pub mod handle;
pub mod persona;
pub mod transport;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig, Cast, CastMember, UPDATED_PREFIX};
pub use controller::{ControllerConfig, NoHooks, TurnController, TurnHooks};
pub use conversation::{History, Turn, TurnContent};
pub use dialog_log::{DEFAULT_LOG_DIRECTORY, DialogLog};
pub use error::{Error, Result};
pub use handle::{TurnHandle, TurnStatus};
pub use persona::{Character, Persona};
pub use transport::{FieldStream, ProviderTransport, RetryConfig, Transport};
