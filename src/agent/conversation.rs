use crate::browser::Screenshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One turn of the conversation between orchestrator and model.
///
/// Screenshots are shared via `Arc` so trimming a rendered view never copies
/// the (large) PNG payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    System {
        text: String,
    },
    User {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        screenshot: Option<Arc<Screenshot>>,
    },
    Assistant {
        text: String,
    },
}

/// Append-only turn history owned by the orchestrator.
///
/// Prior turns are never mutated; every step appends. The model sees a
/// rendered view via [`Conversation::trimmed`], which elides old screenshots
/// without touching the owned log, keeping replay deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::System { text: text.into() });
    }

    pub fn push_user(&mut self, text: impl Into<String>, screenshot: Option<Arc<Screenshot>>) {
        self.turns.push(Turn::User {
            text: text.into(),
            screenshot,
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::Assistant { text: text.into() });
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the history for a model call, keeping only the newest
    /// `max_images` screenshots. Older observation turns keep their text so
    /// the model still sees what happened; only the image payload is elided.
    pub fn trimmed(&self, max_images: usize) -> Vec<Turn> {
        let with_image: Vec<usize> = self
            .turns
            .iter()
            .enumerate()
            .filter_map(|(i, t)| match t {
                Turn::User {
                    screenshot: Some(_),
                    ..
                } => Some(i),
                _ => None,
            })
            .collect();

        let cutoff = with_image.len().saturating_sub(max_images);
        let elide: std::collections::HashSet<usize> =
            with_image[..cutoff].iter().copied().collect();

        self.turns
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if elide.contains(&i) {
                    if let Turn::User { text, .. } = t {
                        return Turn::User {
                            text: text.clone(),
                            screenshot: None,
                        };
                    }
                }
                t.clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot(url: &str) -> Arc<Screenshot> {
        Arc::new(Screenshot {
            base64: "cGVuZ3Vpbg==".to_string(),
            width: 1280,
            height: 720,
            url: url.to_string(),
        })
    }

    fn image_count(turns: &[Turn]) -> usize {
        turns
            .iter()
            .filter(|t| matches!(t, Turn::User { screenshot: Some(_), .. }))
            .count()
    }

    #[test]
    fn test_new_conversation_is_empty() {
        let conv = Conversation::new();
        assert!(conv.is_empty());
        assert_eq!(conv.len(), 0);
    }

    #[test]
    fn test_turns_appear_in_append_order() {
        let mut conv = Conversation::new();
        conv.push_system("rules");
        conv.push_user("Task: buy shoes", None);
        conv.push_assistant("Click(1, 2)");

        assert_eq!(conv.len(), 3);
        assert!(matches!(&conv.turns()[0], Turn::System { text } if text == "rules"));
        assert!(matches!(&conv.turns()[1], Turn::User { text, .. } if text == "Task: buy shoes"));
        assert!(matches!(&conv.turns()[2], Turn::Assistant { text } if text == "Click(1, 2)"));
    }

    #[test]
    fn test_trimmed_keeps_only_newest_images() {
        let mut conv = Conversation::new();
        conv.push_system("rules");
        for i in 0..4 {
            conv.push_user(format!("Current URL: page{}", i), Some(shot("u")));
            conv.push_assistant("Scroll(0, 300)");
        }

        let rendered = conv.trimmed(1);
        assert_eq!(image_count(&rendered), 1);
        // The surviving image is the newest observation.
        assert!(matches!(
            &rendered[rendered.len() - 2],
            Turn::User { text, screenshot: Some(_) } if text == "Current URL: page3"
        ));
    }

    #[test]
    fn test_trimmed_preserves_text_of_elided_observations() {
        let mut conv = Conversation::new();
        conv.push_user("Current URL: old", Some(shot("old")));
        conv.push_user("Current URL: new", Some(shot("new")));

        let rendered = conv.trimmed(1);
        assert!(matches!(
            &rendered[0],
            Turn::User { text, screenshot: None } if text == "Current URL: old"
        ));
    }

    #[test]
    fn test_trimmed_is_a_view_not_a_mutation() {
        let mut conv = Conversation::new();
        conv.push_user("a", Some(shot("a")));
        conv.push_user("b", Some(shot("b")));

        let _ = conv.trimmed(1);
        assert_eq!(image_count(conv.turns()), 2);
    }

    #[test]
    fn test_trimmed_with_budget_larger_than_history() {
        let mut conv = Conversation::new();
        conv.push_user("a", Some(shot("a")));
        let rendered = conv.trimmed(5);
        assert_eq!(image_count(&rendered), 1);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut conv = Conversation::new();
        conv.push_system("rules");
        conv.push_user("obs", Some(shot("u")));
        conv.push_assistant("Finished()");

        let json = serde_json::to_string(&conv).unwrap();
        let restored: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.len(), 3);
        // The shared screenshot payload must survive the roundtrip intact.
        assert!(matches!(
            &restored.turns()[1],
            Turn::User { screenshot: Some(shot), .. } if shot.url == "u"
        ));
    }
}
