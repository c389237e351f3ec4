//! Reading generation.
//!
//! [`ReadingGenerator::generate`] fills the system prompt with the reference
//! texts, asks the LLM for a schema-constrained [`Prediction`], and validates
//! it. [`ReadingGenerator::follow_up`] continues a conversation with a
//! simpler prompt and returns free text. Neither retries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::core::output::{Prediction, PREDICTION_SCHEMA_NAME};
use crate::llms::base_llm::{ChatMessage, LlmClient, OutputSchema};
use crate::utilities::errors::{OracleError, OracleResult};
use crate::utilities::string_utils::{interpolate_only, template_variables};

const EMBEDDED_SYSTEM_PROMPT: &str = include_str!("templates/system_prompt.txt");
const EMBEDDED_FOLLOW_UP_PROMPT: &str = include_str!("templates/follow_up_prompt.txt");

/// Placeholders the system prompt must contain.
pub const SYSTEM_PROMPT_VARIABLES: [&str; 3] = ["language", "parent_context", "child_context"];

/// The two prompt templates, validated at load time.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    system: String,
    follow_up: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: EMBEDDED_SYSTEM_PROMPT.to_string(),
            follow_up: EMBEDDED_FOLLOW_UP_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Build from explicit template text.
    pub fn new(system: impl Into<String>, follow_up: impl Into<String>) -> OracleResult<Self> {
        let templates = Self {
            system: system.into(),
            follow_up: follow_up.into(),
        };
        templates.check()?;
        Ok(templates)
    }

    /// Load the embedded templates, replacing either with a file when given.
    pub fn load(system_file: Option<&Path>, follow_up_file: Option<&Path>) -> OracleResult<Self> {
        let read = |path: Option<&Path>, fallback: &str| -> OracleResult<String> {
            match path {
                None => Ok(fallback.to_string()),
                Some(path) => std::fs::read_to_string(path).map_err(|e| {
                    OracleError::configuration(format!(
                        "Prompt template '{}' could not be read: {}",
                        path.display(),
                        e
                    ))
                }),
            }
        };

        Self::new(
            read(system_file, EMBEDDED_SYSTEM_PROMPT)?,
            read(follow_up_file, EMBEDDED_FOLLOW_UP_PROMPT)?,
        )
    }

    fn check(&self) -> OracleResult<()> {
        let found = template_variables(&self.system);
        if let Some(missing) = SYSTEM_PROMPT_VARIABLES
            .iter()
            .find(|name| !found.contains(**name))
        {
            return Err(OracleError::configuration(format!(
                "System prompt template is missing the {{{}}} placeholder",
                missing
            )));
        }
        if let Some(extra) = found
            .iter()
            .find(|name| !SYSTEM_PROMPT_VARIABLES.contains(&name.as_str()))
        {
            return Err(OracleError::configuration(format!(
                "System prompt template has unknown placeholder {{{}}}",
                extra
            )));
        }
        if self.follow_up.trim().is_empty() {
            return Err(OracleError::configuration("Follow-up prompt template is empty"));
        }
        Ok(())
    }

    /// Substitute the reading context into the system prompt.
    pub fn render_system(&self, language: &str, parent_text: &str, child_text: &str) -> OracleResult<String> {
        let inputs = HashMap::from([
            ("language", language),
            ("parent_context", parent_text),
            ("child_context", child_text),
        ]);
        interpolate_only(&self.system, &inputs).map_err(OracleError::Configuration)
    }

    pub fn follow_up(&self) -> &str {
        &self.follow_up
    }
}

/// Produces readings and follow-up answers through an [`LlmClient`].
#[derive(Debug, Clone)]
pub struct ReadingGenerator {
    llm: Arc<dyn LlmClient>,
    templates: PromptTemplates,
}

impl ReadingGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, templates: PromptTemplates) -> Self {
        Self { llm, templates }
    }

    /// Generate a validated prediction for `question`.
    ///
    /// # Errors
    /// [`OracleError::Generation`] for any LLM failure or schema mismatch.
    pub async fn generate(
        &self,
        question: &str,
        parent_text: &str,
        child_text: &str,
        language: &str,
    ) -> OracleResult<Prediction> {
        let system = self.templates.render_system(language, parent_text, child_text)?;
        let messages = [ChatMessage::system(system), ChatMessage::user(question)];
        let schema = OutputSchema {
            name: PREDICTION_SCHEMA_NAME.to_string(),
            schema: Prediction::json_schema(),
        };

        let started = Instant::now();
        let value = self.llm.complete_structured(&messages, &schema).await?;
        log::info!(
            "LLM reading received from {} in {:.2}s",
            self.llm.model(),
            started.elapsed().as_secs_f64()
        );

        Prediction::from_value(value)
    }

    /// Answer a clarifying question given the conversation so far.
    ///
    /// The follow-up system prompt is sent first, then `history` in order,
    /// then `question` as a user turn.
    pub async fn follow_up(&self, history: &[ChatMessage], question: &str) -> OracleResult<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.templates.follow_up()));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(question));

        let started = Instant::now();
        let answer = self.llm.complete(&messages).await?;
        log::info!(
            "LLM follow-up received from {} in {:.2}s",
            self.llm.model(),
            started.elapsed().as_secs_f64()
        );
        Ok(answer)
    }
}
