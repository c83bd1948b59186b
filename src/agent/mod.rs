pub mod action;
pub mod conversation;
pub mod loop_runner;
pub mod state;

pub use action::{parse_action, reasoning_prefix, Action, ParseError};
pub use conversation::{Conversation, Turn};
pub use loop_runner::{AgentLoop, LoopOptions};
pub use state::{RunOutcome, RunState};
