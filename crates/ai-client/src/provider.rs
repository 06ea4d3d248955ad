use async_trait::async_trait;

use crate::error::AiResult;

/// Backend-agnostic text generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for a single-turn prompt.
    ///
    /// `Ok(None)` means the model answered without any text part.
    async fn generate(&self, prompt: &str) -> AiResult<Option<String>>;
}
