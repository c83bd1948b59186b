pub mod chrome;

pub use chrome::ChromeBrowser;

use crate::agent::action::Action;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A captured viewport frame. The base64 payload is a PNG; width/height are
/// the viewport dimensions the coordinates in the next action refer to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    pub base64: String,
    pub width: u32,
    pub height: u32,
    pub url: String,
}

/// Perception failures. Any of these means the page is unusable, so the
/// orchestrator treats them as fatal.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("failed to capture screenshot: {0}")]
    Capture(String),
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },
}

/// Action execution failures. `Failed` is recoverable and reported back to
/// the model; `SessionClosed` means the browser is gone and the run must end.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("action failed: {0}")]
    Failed(String),
    #[error("browser session closed: {0}")]
    SessionClosed(String),
}

impl ExecutionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::SessionClosed(_))
    }
}

/// The browser collaborator: perception (`capture`) and action (`execute`)
/// behind one interface, since a single page session implements both.
///
/// Coordinates in an executed action are interpreted in the frame of the
/// most recent `capture`; the adapter keeps the viewport fixed so the two
/// never drift.
#[async_trait]
pub trait Browser: Send {
    async fn capture(&mut self) -> Result<Screenshot, BrowserError>;
    async fn execute(&mut self, action: &Action) -> Result<(), ExecutionError>;
}
