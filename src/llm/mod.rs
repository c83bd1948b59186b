pub mod human;
pub mod openai;
pub mod provider;

pub use human::HumanProvider;
pub use openai::ChatCompletionsProvider;
pub use provider::{LlmError, ModelProvider};
