//! Reading requests and persisted readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::output::{HexagramResult, LineChange, OracleResponse, Prediction};
use crate::utilities::errors::{OracleError, OracleResult};

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "English";

/// Languages the prompt is tuned for.
pub const SUPPORTED_LANGUAGES: [&str; 2] = ["English", "Chinese"];

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// A request for a reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingRequest {
    pub question: String,
    pub first_number: i64,
    pub second_number: i64,
    pub third_number: i64,
    #[serde(default = "default_language")]
    pub language: String,
}

impl ReadingRequest {
    pub fn new(question: impl Into<String>, first: i64, second: i64, third: i64) -> Self {
        Self {
            question: question.into(),
            first_number: first,
            second_number: second,
            third_number: third,
            language: default_language(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Reject requests that cannot produce a meaningful prompt.
    pub fn validate(&self) -> OracleResult<()> {
        if self.question.trim().is_empty() {
            return Err(OracleError::InvalidInput("Question must not be empty".into()));
        }
        if self.language.trim().is_empty() {
            return Err(OracleError::InvalidInput("Language must not be empty".into()));
        }
        Ok(())
    }
}

/// A completed reading owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub user_id: String,
    pub question: String,
    pub first_number: i64,
    pub second_number: i64,
    pub third_number: i64,
    pub language: String,
    pub hexagram_name: String,
    pub summary: String,
    pub interpretation: String,
    pub line_change: LineChange,
    pub result: HexagramResult,
    pub advice: String,
    pub image_path: String,
    #[serde(default)]
    pub clarifying_question: Option<String>,
    #[serde(default)]
    pub clarifying_answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reading {
    /// Assemble a new reading from a successful request/response pair.
    pub fn new(user_id: impl Into<String>, request: &ReadingRequest, response: &OracleResponse) -> Self {
        let Prediction {
            hexagram_name,
            summary,
            interpretation,
            line_change,
            result,
            advice,
        } = response.prediction.clone();

        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            question: request.question.clone(),
            first_number: request.first_number,
            second_number: request.second_number,
            third_number: request.third_number,
            language: request.language.clone(),
            hexagram_name,
            summary,
            interpretation,
            line_change,
            result,
            advice,
            image_path: response.image_path.clone(),
            clarifying_question: None,
            clarifying_answer: None,
            created_at: Utc::now(),
        }
    }

    pub fn has_clarification(&self) -> bool {
        self.clarifying_question.is_some()
    }
}
