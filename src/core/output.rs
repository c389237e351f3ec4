//! Structured output of a reading.
//!
//! [`Prediction`] is the six-field object the LLM must return. It is parsed
//! strictly: missing fields, unknown fields and blank strings are rejected so a
//! partially populated reading never leaves the generator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utilities::errors::{OracleError, OracleResult};

/// Name under which the schema is sent to the LLM.
pub const PREDICTION_SCHEMA_NAME: &str = "IChingOutput";

/// The changing line of the consulted hexagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineChange {
    pub line: String,
    pub interpretation: String,
}

/// The hexagram the reading transforms into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HexagramResult {
    pub name: String,
    pub interpretation: String,
}

/// The LLM-generated interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Prediction {
    pub hexagram_name: String,
    pub summary: String,
    pub interpretation: String,
    pub line_change: LineChange,
    pub result: HexagramResult,
    pub advice: String,
}

impl Prediction {
    /// JSON schema for strict structured output.
    pub fn json_schema() -> Value {
        let pair = |a: &str, b: &str| {
            serde_json::json!({
                "type": "object",
                "properties": {
                    a: {"type": "string"},
                    b: {"type": "string"},
                },
                "required": [a, b],
                "additionalProperties": false,
            })
        };

        serde_json::json!({
            "type": "object",
            "properties": {
                "hexagram_name": {"type": "string"},
                "summary": {"type": "string"},
                "interpretation": {"type": "string"},
                "line_change": pair("line", "interpretation"),
                "result": pair("name", "interpretation"),
                "advice": {"type": "string"},
            },
            "required": [
                "hexagram_name",
                "summary",
                "interpretation",
                "line_change",
                "result",
                "advice",
            ],
            "additionalProperties": false,
        })
    }

    /// Parse and validate a structured LLM response.
    pub fn from_value(value: Value) -> OracleResult<Self> {
        let prediction: Prediction = serde_json::from_value(value).map_err(|e| {
            OracleError::generation(format!("Response does not match the reading schema: {}", e))
        })?;
        prediction.validate()?;
        Ok(prediction)
    }

    fn validate(&self) -> OracleResult<()> {
        match self.blank_field() {
            Some(name) => Err(OracleError::generation(format!(
                "Response field '{}' is empty",
                name
            ))),
            None => Ok(()),
        }
    }

    /// Name of the first field that is empty or whitespace only.
    pub(crate) fn blank_field(&self) -> Option<&'static str> {
        let fields = [
            ("hexagram_name", &self.hexagram_name),
            ("summary", &self.summary),
            ("interpretation", &self.interpretation),
            ("line_change.line", &self.line_change.line),
            ("line_change.interpretation", &self.line_change.interpretation),
            ("result.name", &self.result.name),
            ("result.interpretation", &self.result.interpretation),
            ("advice", &self.advice),
        ];
        fields
            .iter()
            .find(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
    }
}

/// What `get_reading` returns: the prediction plus the hexagram image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub image_path: String,
}
