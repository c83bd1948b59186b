use crate::agent::action::{reasoning_prefix, Action};
use crate::agent::state::RunOutcome;
use crate::browser::Screenshot;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrajectoryError {
    #[error("failed to write trajectory: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize summary: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to decode screenshot: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Everything that happened in one step, immutable once created.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub index: u32,
    pub screenshot: Arc<Screenshot>,
    pub raw_response: String,
    pub action: Option<Action>,
    pub parse_error: Option<String>,
    pub execution_error: Option<String>,
}

/// Step record consumer, called exactly once per loop iteration.
///
/// Must not block the loop indefinitely; a sink that does is faulty, not the
/// orchestrator.
pub trait TrajectorySink: Send {
    fn record(&mut self, record: &StepRecord) -> Result<(), TrajectoryError>;

    /// Called once when the run reaches a terminal state.
    fn finalize(&mut self, outcome: &RunOutcome) -> Result<(), TrajectoryError>;
}

#[derive(Serialize)]
struct StepEntry {
    step: u32,
    url: String,
    screenshot: String,
    llm_response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_error: Option<String>,
}

#[derive(Serialize)]
struct Summary<'a> {
    task: &'a str,
    timestamp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: &'a Option<RunOutcome>,
    total_steps: usize,
    steps: &'a [StepEntry],
}

/// Filesystem sink. Layout per run:
///
/// ```text
/// <output_dir>/<UTC timestamp>/
///     summary.json
///     screenshots/step_00.png
///     screenshots/step_01.png
/// ```
///
/// `summary.json` is rewritten after every step so a crash mid-run leaves a
/// valid partial trajectory.
pub struct RunWriter {
    run_dir: PathBuf,
    task: String,
    timestamp: String,
    entries: Vec<StepEntry>,
    outcome: Option<RunOutcome>,
}

impl RunWriter {
    pub fn create(output_dir: &Path, task: &str) -> Result<Self, TrajectoryError> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let run_dir = output_dir.join(&timestamp);
        fs::create_dir_all(run_dir.join("screenshots"))?;

        let writer = Self {
            run_dir,
            task: task.to_string(),
            timestamp,
            entries: Vec::new(),
            outcome: None,
        };
        writer.write_summary()?;
        Ok(writer)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn write_summary(&self) -> Result<(), TrajectoryError> {
        let summary = Summary {
            task: &self.task,
            timestamp: &self.timestamp,
            outcome: &self.outcome,
            total_steps: self.entries.len(),
            steps: &self.entries,
        };
        let json = serde_json::to_string_pretty(&summary)?;
        // Write-then-rename so a crash mid-rewrite never truncates the
        // previous valid summary.
        let tmp = self.run_dir.join("summary.json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.run_dir.join("summary.json"))?;
        Ok(())
    }
}

impl TrajectorySink for RunWriter {
    fn record(&mut self, record: &StepRecord) -> Result<(), TrajectoryError> {
        let image_name = format!("step_{:02}.png", record.index);
        let png = STANDARD.decode(&record.screenshot.base64)?;
        fs::write(self.run_dir.join("screenshots").join(&image_name), png)?;

        self.entries.push(StepEntry {
            step: record.index,
            url: record.screenshot.url.clone(),
            screenshot: format!("screenshots/{}", image_name),
            llm_response: record.raw_response.clone(),
            reasoning: reasoning_prefix(&record.raw_response),
            action: record.action.clone(),
            parse_error: record.parse_error.clone(),
            execution_error: record.execution_error.clone(),
        });
        self.write_summary()
    }

    fn finalize(&mut self, outcome: &RunOutcome) -> Result<(), TrajectoryError> {
        self.outcome = Some(outcome.clone());
        self.write_summary()
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<StepRecord>,
    pub outcome: Option<RunOutcome>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrajectorySink for MemorySink {
    fn record(&mut self, record: &StepRecord) -> Result<(), TrajectoryError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finalize(&mut self, outcome: &RunOutcome) -> Result<(), TrajectoryError> {
        self.outcome = Some(outcome.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32, response: &str) -> StepRecord {
        let action = crate::agent::action::parse_action(response).ok();
        let parse_error = crate::agent::action::parse_action(response)
            .err()
            .map(|e| e.to_string());
        StepRecord {
            index,
            screenshot: Arc::new(Screenshot {
                // "png" is not a real PNG; the writer stores bytes verbatim.
                base64: STANDARD.encode(b"png"),
                width: 1280,
                height: 720,
                url: "https://example.com".to_string(),
            }),
            raw_response: response.to_string(),
            action,
            parse_error,
            execution_error: None,
        }
    }

    #[test]
    fn test_writer_persists_incrementally() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::create(tmp.path(), "buy shoes").unwrap();

        writer.record(&record(0, "Click(250, 41)")).unwrap();

        // Partial trajectory is already valid on disk.
        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.run_dir().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["task"], "buy shoes");
        assert_eq!(summary["total_steps"], 1);
        assert_eq!(summary["steps"][0]["action"]["action"], "click");
        assert!(writer
            .run_dir()
            .join("screenshots/step_00.png")
            .exists());

        writer.record(&record(1, "garbage reply")).unwrap();
        writer.finalize(&RunOutcome::StepLimitReached).unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.run_dir().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["total_steps"], 2);
        assert_eq!(summary["outcome"]["outcome"], "step_limit_reached");
        assert!(summary["steps"][1]["parse_error"].is_string());
        assert!(summary["steps"][1].get("action").is_none());
    }

    #[test]
    fn test_summary_rewrite_replaces_file_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::create(tmp.path(), "t").unwrap();
        writer.record(&record(0, "Click(1, 2)")).unwrap();
        writer.record(&record(1, "Click(3, 4)")).unwrap();

        // Every rewrite lands fully; no intermediate file survives.
        assert!(writer.run_dir().join("summary.json").exists());
        assert!(!writer.run_dir().join("summary.json.tmp").exists());
        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.run_dir().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["total_steps"], 2);
    }

    #[test]
    fn test_reasoning_is_extracted_into_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::create(tmp.path(), "t").unwrap();
        writer
            .record(&record(0, "The search bar is at the top.\nClick(250, 41)"))
            .unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.run_dir().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["steps"][0]["reasoning"], "The search bar is at the top.");
    }

    #[test]
    fn test_screenshot_bytes_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = RunWriter::create(tmp.path(), "t").unwrap();
        writer.record(&record(0, "Finished()")).unwrap();

        let bytes = fs::read(writer.run_dir().join("screenshots/step_00.png")).unwrap();
        assert_eq!(bytes, b"png");
    }

    #[test]
    fn test_memory_sink_collects_in_order() {
        let mut sink = MemorySink::new();
        sink.record(&record(0, "Click(1, 2)")).unwrap();
        sink.record(&record(1, "Finished()")).unwrap();
        sink.finalize(&RunOutcome::Finished).unwrap();

        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].index, 1);
        assert_eq!(sink.outcome, Some(RunOutcome::Finished));
    }
}
