//! Error types shared by every oracle component.
//!
//! Lookup, generation and store failures all surface as [`OracleError`] so the
//! HTTP layer can map them onto status codes in one place.

use thiserror::Error;

/// Errors raised by the oracle core, its stores and its collaborators.
#[derive(Debug, Error)]
pub enum OracleError {
    /// A coordinate, quota record or reading does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The LLM call failed or returned data that does not match the schema.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Required credentials or templates are missing. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller credentials are missing or were rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A request value is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The write would violate a one-shot invariant.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backing store failed at the transport or protocol level.
    #[error("Store error: {0}")]
    Store(String),
}

impl OracleError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

impl From<rusqlite::Error> for OracleError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(format!("SQLite: {}", e))
    }
}

/// Result alias used throughout the crate.
pub type OracleResult<T> = Result<T, OracleError>;
