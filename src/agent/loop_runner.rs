use super::action::{parse_action, Action};
use super::conversation::Conversation;
use super::state::{RunOutcome, RunState};
use crate::browser::{Browser, BrowserError, Screenshot};
use crate::llm::ModelProvider;
use crate::trajectory::{StepRecord, TrajectorySink};
use std::sync::Arc;
use tracing::{error, info, warn};

const SYSTEM_PROMPT: &str = "\
You control a web browser to complete a task for the user.

Each turn you receive a screenshot of the current page and its URL. Look at \
the screenshot, briefly explain what you see and what you will do, then end \
your reply with exactly one action:

  Click(x, y)      click at pixel coordinates in the screenshot
  Type(text)       type the text into the focused element
  Press(key)       press a key, e.g. Press(Enter)
  Scroll(dx, dy)   scroll by pixel deltas; positive dy scrolls down
  Finished()       the task is complete

Rules:
- Coordinates are absolute pixels in the screenshot, origin at the top left.
- Click an input field before typing into it.
- Issue exactly one action per reply.
- When the task is done, reply with Finished().";

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Step budget for the run.
    pub max_steps: u32,
    /// How many screenshots the model sees per call; older ones are elided.
    pub max_images: usize,
    /// Extra capture attempts before a failed screenshot ends the run.
    pub max_capture_retries: u32,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_images: 1,
            max_capture_retries: 0,
        }
    }
}

/// The perceive/decide/act loop. Owns nothing but the policy: the browser,
/// model and trajectory sink are borrowed collaborators behind their traits.
pub struct AgentLoop<'a> {
    browser: &'a mut dyn Browser,
    model: &'a dyn ModelProvider,
    sink: &'a mut dyn TrajectorySink,
    options: LoopOptions,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        browser: &'a mut dyn Browser,
        model: &'a dyn ModelProvider,
        sink: &'a mut dyn TrajectorySink,
        options: LoopOptions,
    ) -> Self {
        Self {
            browser,
            model,
            sink,
            options,
        }
    }

    /// Drive the task to a terminal outcome. Never panics and never returns
    /// early without finalizing the trajectory.
    pub async fn run(&mut self, task: &str) -> RunOutcome {
        let mut state = RunState::new(task);
        info!(task = %state.task, "starting run");
        let mut conversation = Conversation::new();
        conversation.push_system(SYSTEM_PROMPT);
        conversation.push_user(format!("Task: {}", state.task), None);

        let outcome = self.drive(&mut state, &mut conversation).await;
        // Recording is best-effort; a full disk must not change the outcome.
        if let Err(e) = self.sink.finalize(&outcome) {
            warn!("failed to finalize trajectory: {}", e);
        }
        outcome
    }

    async fn drive(
        &mut self,
        state: &mut RunState,
        conversation: &mut Conversation,
    ) -> RunOutcome {
        // A zero budget means zero steps: no capture, no model call.
        if self.options.max_steps == 0 {
            return RunOutcome::StepLimitReached;
        }

        loop {
            let shot = match self.capture_with_retries().await {
                Ok(shot) => Arc::new(shot),
                Err(e) => {
                    error!("screenshot capture failed: {}", e);
                    return RunOutcome::FatalError {
                        reason: format!("capture failed: {}", e),
                    };
                }
            };

            conversation.push_user(
                format!("Current URL: {}", shot.url),
                Some(Arc::clone(&shot)),
            );

            let rendered = conversation.trimmed(self.options.max_images);
            let reply = match self.model.infer(&rendered).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("model call failed: {}", e);
                    return RunOutcome::FatalError {
                        reason: format!("model call failed: {}", e),
                    };
                }
            };
            conversation.push_assistant(reply.clone());

            let index = state.steps_taken;
            let mut record = StepRecord {
                index,
                screenshot: Arc::clone(&shot),
                raw_response: reply.clone(),
                action: None,
                parse_error: None,
                execution_error: None,
            };

            let parsed = parse_action(&reply);
            let mut fatal = None;
            match &parsed {
                Err(e) => {
                    warn!(step = index, "unparsable reply: {}", e);
                    record.parse_error = Some(e.to_string());
                    conversation.push_user(
                        format!(
                            "Your reply did not contain a valid action ({}). \
                             End your next reply with exactly one of: Click(x, y), \
                             Type(text), Press(key), Scroll(dx, dy), Finished().",
                            e
                        ),
                        None,
                    );
                }
                Ok(action) => {
                    record.action = Some(action.clone());
                    if *action != Action::Finished {
                        match self.browser.execute(action).await {
                            Ok(()) => info!(step = index, "executed {}", action.keyword()),
                            Err(e) => {
                                record.execution_error = Some(e.to_string());
                                if e.is_fatal() {
                                    fatal = Some(format!("browser session lost: {}", e));
                                } else {
                                    warn!(step = index, "{} failed: {}", action.keyword(), e);
                                    conversation.push_user(
                                        format!(
                                            "The last action failed: {}. The page may be \
                                             unchanged; pick a different action.",
                                            e
                                        ),
                                        None,
                                    );
                                }
                            }
                        }
                    }
                }
            }

            if let Err(e) = self.sink.record(&record) {
                warn!(step = index, "failed to record step: {}", e);
            }

            let budget_spent = state.consume_step(self.options.max_steps);

            if let Some(reason) = fatal {
                error!("{}", reason);
                return RunOutcome::FatalError { reason };
            }
            if matches!(parsed, Ok(Action::Finished)) {
                info!("task finished after {} steps", state.steps_taken);
                return RunOutcome::Finished;
            }
            if budget_spent {
                info!("step budget of {} exhausted", self.options.max_steps);
                return RunOutcome::StepLimitReached;
            }
        }
    }

    async fn capture_with_retries(&mut self) -> Result<Screenshot, BrowserError> {
        let mut attempt = 0;
        loop {
            match self.browser.capture().await {
                Ok(shot) => return Ok(shot),
                Err(e) if attempt < self.options.max_capture_retries => {
                    attempt += 1;
                    warn!("capture failed (attempt {}): {}", attempt, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
