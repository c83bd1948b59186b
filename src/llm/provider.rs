use crate::agent::conversation::Turn;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// The model port. Stateless across calls: everything the model may see
/// arrives in the turn slice, so any conversation-in/text-out backend fits,
/// including a human at a terminal.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn infer(&self, turns: &[Turn]) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}
