//! OpenAI Chat Completions provider.
//!
//! Structured readings use `response_format = {"type": "json_schema", ...}`
//! with `strict: true`; follow-ups are plain completions. One HTTP round trip
//! per call, no retry loop.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llms::base_llm::{ChatMessage, LlmClient, OutputSchema};
use crate::utilities::config::LlmConfig;
use crate::utilities::errors::{OracleError, OracleResult};

/// Default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI completion client.
///
/// Holds one `reqwest::Client` for the lifetime of the process; construct it
/// at startup and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    /// Sampling temperature; provider default when `None`.
    pub temperature: Option<f64>,
}

impl OpenAICompletion {
    /// Create a client with the given key, model and request timeout.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> OracleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: None,
        })
    }

    /// Create a client from loaded configuration.
    pub fn from_config(config: &LlmConfig) -> OracleResult<Self> {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
            config.timeout,
        )
    }

    /// Build the request body for the Chat Completions API.
    pub fn build_request_body(&self, messages: &[ChatMessage], schema: Option<&OutputSchema>) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(schema) = schema {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                },
            });
        }

        body
    }

    async fn send(&self, body: &Value) -> OracleResult<Value> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::generation(format!("OpenAI request timed out: {}", e))
                } else {
                    OracleError::generation(format!("OpenAI request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OracleError::generation(format!("Failed to read OpenAI response: {}", e)))?;

        if !status.is_success() {
            return Err(OracleError::generation(format!(
                "OpenAI API error ({}): {}",
                status,
                truncate(&text, 500)
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            OracleError::generation(format!(
                "Failed to parse OpenAI response: {} - Body: {}",
                e,
                truncate(&text, 500)
            ))
        })
    }
}

/// Extract the assistant message text from a Chat Completions response.
///
/// A refusal or an empty message is an error.
pub fn parse_completion_content(response: &Value) -> OracleResult<String> {
    let message = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| OracleError::generation("No message in OpenAI response"))?;

    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        return Err(OracleError::generation(format!("Model refused: {}", refusal)));
    }

    if let Some(usage) = response.get("usage") {
        log::debug!(
            "OpenAI token usage: prompt={}, completion={}, total={}",
            usage.get("prompt_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            usage.get("completion_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
            usage.get("total_tokens").and_then(|v| v.as_i64()).unwrap_or(0),
        );
    }

    match message.get("content").and_then(|c| c.as_str()) {
        Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
        _ => Err(OracleError::generation("Empty completion from OpenAI")),
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl LlmClient for OpenAICompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> OracleResult<Value> {
        log::debug!(
            "OpenAICompletion structured call: model={}, messages={}, schema={}",
            self.model,
            messages.len(),
            schema.name
        );

        let body = self.build_request_body(messages, Some(schema));
        let response = self.send(&body).await?;
        let content = parse_completion_content(&response)?;

        serde_json::from_str(&content).map_err(|e| {
            OracleError::generation(format!("Structured output is not valid JSON: {}", e))
        })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> OracleResult<String> {
        log::debug!(
            "OpenAICompletion call: model={}, messages={}",
            self.model,
            messages.len()
        );

        let body = self.build_request_body(messages, None);
        let response = self.send(&body).await?;
        parse_completion_content(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAICompletion {
        OpenAICompletion::new("sk-test", "gpt-4o", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_body_with_schema() {
        let schema = OutputSchema {
            name: "IChingOutput".into(),
            schema: serde_json::json!({"type": "object"}),
        };
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("q")];
        let body = provider().build_request_body(&messages, Some(&schema));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "IChingOutput");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_request_body_plain() {
        let mut p = provider();
        p.temperature = Some(0.2);
        let body = p.build_request_body(&[ChatMessage::user("q")], None);
        assert!(body.get("response_format").is_none());
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = OpenAICompletion::new("k", "m", Some("http://localhost:1234/v1/".into()), Duration::from_secs(1))
            .unwrap();
        assert_eq!(p.base_url, "http://localhost:1234/v1");
    }

    #[test]
    fn test_parse_completion_content() {
        let response = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "The oracle speaks."}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
        });
        assert_eq!(parse_completion_content(&response).unwrap(), "The oracle speaks.");
    }

    #[test]
    fn test_parse_completion_refusal() {
        let response = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": null, "refusal": "no"}}]
        });
        let err = parse_completion_content(&response).unwrap_err();
        assert!(matches!(err, OracleError::Generation(_)));
    }

    #[test]
    fn test_parse_completion_missing_choices() {
        assert!(parse_completion_content(&serde_json::json!({"choices": []})).is_err());
        assert!(parse_completion_content(&serde_json::json!({
            "choices": [{"message": {"content": ""}}]
        }))
        .is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("易經易經", 2), "易經");
        assert_eq!(truncate("short", 10), "short");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_generation_error() {
        let p = OpenAICompletion::new(
            "k",
            "gpt-4o",
            Some("http://127.0.0.1:9".into()),
            Duration::from_millis(500),
        )
        .unwrap();
        let err = p.complete(&[ChatMessage::user("q")]).await.unwrap_err();
        assert!(matches!(err, OracleError::Generation(_)));
    }
}
