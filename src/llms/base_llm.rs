//! LLM client abstraction.
//!
//! The generator talks to the model only through [`LlmClient`], so the
//! provider is chosen once at startup and tests can substitute a stub.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utilities::errors::OracleResult;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Target schema for a structured completion.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    /// Schema name reported to the provider.
    pub name: String,
    /// JSON schema the response must satisfy.
    pub schema: Value,
}

/// A chat-completion backend.
///
/// Implementations must not retry: every failure (transport, timeout,
/// provider error, unparseable body) is returned as
/// [`OracleError::Generation`](crate::utilities::errors::OracleError::Generation).
#[async_trait]
pub trait LlmClient: Send + Sync + fmt::Debug {
    /// Model identifier, for logging.
    fn model(&self) -> &str;

    /// Run one completion constrained to `schema` and return the parsed JSON object.
    async fn complete_structured(
        &self,
        messages: &[ChatMessage],
        schema: &OutputSchema,
    ) -> OracleResult<Value>;

    /// Run one free-text completion.
    async fn complete(&self, messages: &[ChatMessage]) -> OracleResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_message_rejects_unknown_role() {
        let parsed: Result<ChatMessage, _> =
            serde_json::from_value(serde_json::json!({"role": "tool", "content": "x"}));
        assert!(parsed.is_err());
    }
}
