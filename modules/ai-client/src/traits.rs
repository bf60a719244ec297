use std::time::Duration;

use async_trait::async_trait;

use crate::error::AiError;

// =============================================================================
// Agent Trait
// =============================================================================

pub trait Agent: Clone + Send + Sync {
    type PromptBuilder: PromptBuilder;

    fn prompt(&self, input: impl Into<String>) -> Self::PromptBuilder;
}

// =============================================================================
// PromptBuilder Trait
// =============================================================================

#[async_trait]
pub trait PromptBuilder: Send + Sized {
    fn temperature(self, temperature: f32) -> Self;
    fn max_tokens(self, max_tokens: u32) -> Self;
    fn timeout(self, timeout: Duration) -> Self;
    /// Ask the gateway for a bare JSON object (`response_format = json_object`).
    fn json_object(self) -> Self;
    async fn send(self) -> Result<String, AiError>;
}
