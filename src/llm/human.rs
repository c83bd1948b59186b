use super::provider::{LlmError, ModelProvider};
use crate::agent::conversation::Turn;
use async_trait::async_trait;
use std::io::Write;

/// A human standing in for the model: prints the conversation tail to the
/// terminal and reads the next action line from stdin.
///
/// Exists to keep the model port honest — anything that can turn a
/// conversation into a line of text is a valid provider.
pub struct HumanProvider;

#[async_trait]
impl ModelProvider for HumanProvider {
    async fn infer(&self, turns: &[Turn]) -> Result<String, LlmError> {
        let transcript = render_tail(turns);

        let reply = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{}", transcript);
            let _ = writeln!(
                stderr,
                "Actions: Click(x, y) | Type(text) | Press(key) | Scroll(dx, dy) | Finished()"
            );
            let _ = write!(stderr, "Your action: ");
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .map(|_| line.trim().to_string())
        })
        .await
        .map_err(|e| LlmError::Api(format!("stdin task failed: {}", e)))?
        .map_err(|e| LlmError::Api(format!("failed to read stdin: {}", e)))?;

        Ok(reply)
    }

    fn name(&self) -> &str {
        "human"
    }
}

fn render_tail(turns: &[Turn]) -> String {
    let mut out = String::from("\n========================================\n");
    for turn in turns {
        match turn {
            Turn::System { .. } => {}
            Turn::User { text, screenshot } => {
                out.push_str("[OBSERVATION] ");
                out.push_str(text);
                if screenshot.is_some() {
                    out.push_str(" (screenshot attached)");
                }
                out.push('\n');
            }
            Turn::Assistant { text } => {
                out.push_str("[AGENT] ");
                out.push_str(text);
                out.push('\n');
            }
        }
    }
    out.push_str("========================================");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tail_skips_system_and_marks_images() {
        let turns = vec![
            Turn::System {
                text: "rules".to_string(),
            },
            Turn::User {
                text: "Task: buy shoes".to_string(),
                screenshot: None,
            },
            Turn::Assistant {
                text: "Click(1, 2)".to_string(),
            },
        ];
        let rendered = render_tail(&turns);
        assert!(!rendered.contains("rules"));
        assert!(rendered.contains("[OBSERVATION] Task: buy shoes"));
        assert!(rendered.contains("[AGENT] Click(1, 2)"));
    }
}
