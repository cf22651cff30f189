//! The speaker seam used by the agent

use async_trait::async_trait;

use crate::Result;

/// Anything that can voice a line of text
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `text`; resolves once playback has finished or been interrupted.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stop current playback and drop anything queued.
    fn interrupt(&self);
}
