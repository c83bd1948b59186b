use super::provider::{LlmError, ModelProvider};
use crate::agent::conversation::Turn;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const MAX_TOKENS: u32 = 1024;

/// Chat-completions provider for any OpenAI-compatible endpoint.
///
/// OpenRouter, OpenAI and self-hosted gateways all speak the same wire
/// format, so a single provider parameterized by base URL covers them.
pub struct ChatCompletionsProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    label: &'static str,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn openrouter(api_key: String, model: String) -> Self {
        Self::new(OPENROUTER_BASE_URL.to_string(), Some(api_key), model, "openrouter")
    }

    pub fn openai(api_key: String, model: String) -> Self {
        Self::new(OPENAI_BASE_URL.to_string(), Some(api_key), model, "openai")
    }

    pub fn compatible(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self::new(base_url, api_key, model, "openai_compatible")
    }

    fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        label: &'static str,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            label,
        }
    }

    fn to_message(turn: &Turn) -> ChatMessage {
        match turn {
            Turn::System { text } => ChatMessage {
                role: "system",
                content: ChatContent::Text(text.clone()),
            },
            Turn::Assistant { text } => ChatMessage {
                role: "assistant",
                content: ChatContent::Text(text.clone()),
            },
            Turn::User { text, screenshot } => match screenshot {
                Some(shot) => ChatMessage {
                    role: "user",
                    content: ChatContent::Parts(vec![
                        ChatPart::Text { text: text.clone() },
                        ChatPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/png;base64,{}", shot.base64),
                            },
                        },
                    ]),
                },
                None => ChatMessage {
                    role: "user",
                    content: ChatContent::Text(text.clone()),
                },
            },
        }
    }
}

#[async_trait]
impl ModelProvider for ChatCompletionsProvider {
    async fn infer(&self, turns: &[Turn]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages: turns.iter().map(Self::to_message).collect(),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{}: {}", status, body)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("no content in completion".to_string()))?;

        debug!("{} replied with {} chars", self.label, content.len());
        Ok(content)
    }

    fn name(&self) -> &str {
        self.label
    }
}
