use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;

/// A single chat completion call
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Narrow interface over the language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &Completion) -> Result<String, ModelError>;
}

/// OpenAI-compatible chat completions client
pub struct OpenAiModel {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiModel {
    pub fn new(http: reqwest::Client, api_key: Option<String>, base_url: String) -> Self {
        Self {
            http,
            api_key,
            base_url,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, request: &Completion) -> Result<String, ModelError> {
        let api_key = self.api_key.as_deref().ok_or(ModelError::NotConfigured)?;

        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!("Language model returned {}: {}", status, detail);
            return Err(ModelError::Request(format!("status {}", status)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)
    }
}

/// Best-effort JSON extraction from model output
///
/// Strips markdown code fences and falls back to the outermost `{...}` span
/// when the model wraps the object in prose.
pub fn extract_json(raw: &str) -> Result<Value, ModelError> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&text[start..=end])
            .map_err(|e| ModelError::Parse(e.to_string())),
        _ => Err(ModelError::Parse("no JSON object in model output".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_extract_json_strips_fences() {
        let raw = "```json\n{\"beginner\": [[1, \"q\"]]}\n```";
        assert_eq!(extract_json(raw).unwrap(), json!({"beginner": [[1, "q"]]}));
    }

    #[test]
    fn test_extract_json_from_prose() {
        let raw = "Here you go: {\"evaluation\": []} hope this helps";
        assert_eq!(extract_json(raw).unwrap(), json!({"evaluation": []}));
    }

    #[test]
    fn test_extract_json_rejects_garbage() {
        assert!(matches!(extract_json("no json here"), Err(ModelError::Parse(_))));
    }
}
