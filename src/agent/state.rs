use serde::{Deserialize, Serialize};

/// Terminal result of a run, surfaced to whatever drives the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model issued `Finished()`.
    Finished,
    /// The step budget ran out before the model finished. Expected, not an
    /// error.
    StepLimitReached,
    /// The environment broke: browser unusable or model unreachable.
    FatalError { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Finished)
    }
}

/// Per-run bookkeeping, owned and mutated only by the orchestrator.
#[derive(Debug, Clone)]
pub struct RunState {
    pub task: String,
    pub steps_taken: u32,
}

impl RunState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps_taken: 0,
        }
    }

    /// Count a completed step and report whether the budget is spent.
    pub fn consume_step(&mut self, max_steps: u32) -> bool {
        self.steps_taken += 1;
        self.steps_taken >= max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_has_no_steps() {
        let state = RunState::new("buy shoes");
        assert_eq!(state.task, "buy shoes");
        assert_eq!(state.steps_taken, 0);
    }

    #[test]
    fn test_consume_step_reports_budget_exhaustion() {
        let mut state = RunState::new("t");
        assert!(!state.consume_step(3));
        assert!(!state.consume_step(3));
        assert!(state.consume_step(3));
        assert_eq!(state.steps_taken, 3);
    }

    #[test]
    fn test_outcome_serde_tags() {
        let json = serde_json::to_value(RunOutcome::Finished).unwrap();
        assert_eq!(json["outcome"], "finished");
        let json = serde_json::to_value(RunOutcome::FatalError {
            reason: "browser died".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "fatal_error");
        assert_eq!(json["reason"], "browser died");
    }
}
