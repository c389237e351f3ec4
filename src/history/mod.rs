//! Per-user reading history.

use std::sync::Arc;

use uuid::Uuid;

use crate::core::output::OracleResponse;
use crate::core::reading::{Reading, ReadingRequest};
use crate::store::ReadingStore;
use crate::utilities::errors::{OracleError, OracleResult};

/// Reading history operations over a [`ReadingStore`].
#[derive(Clone)]
pub struct ReadingHistory {
    store: Arc<dyn ReadingStore>,
}

impl ReadingHistory {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Persist a completed reading. Call only after a successful generation.
    pub async fn save(
        &self,
        user_id: &str,
        request: &ReadingRequest,
        response: &OracleResponse,
    ) -> OracleResult<Reading> {
        let reading = Reading::new(user_id, request, response);
        let saved = self.store.insert(&reading).await?;
        log::info!("Saved reading {} for user {}", saved.id, user_id);
        Ok(saved)
    }

    /// The user's readings, newest first.
    pub async fn list(&self, user_id: &str) -> OracleResult<Vec<Reading>> {
        let readings = self.store.list(user_id).await?;
        log::debug!("Loaded {} readings for user {}", readings.len(), user_id);
        Ok(readings)
    }

    pub async fn get(&self, user_id: &str, reading_id: Uuid) -> OracleResult<Reading> {
        self.store
            .get(user_id, reading_id)
            .await?
            .ok_or_else(|| OracleError::not_found(format!("Reading {} not found", reading_id)))
    }

    /// Attach the clarifying question and answer to a reading.
    ///
    /// # Errors
    /// [`OracleError::NotFound`] when the reading does not exist for the
    /// user, [`OracleError::Conflict`] when a clarification is already attached.
    pub async fn attach_clarification(
        &self,
        user_id: &str,
        reading_id: Uuid,
        question: &str,
        answer: &str,
    ) -> OracleResult<Reading> {
        if question.trim().is_empty() || answer.trim().is_empty() {
            return Err(OracleError::InvalidInput(
                "Clarifying question and answer must not be empty".into(),
            ));
        }

        if let Some(updated) = self
            .store
            .set_clarification(user_id, reading_id, question, answer)
            .await?
        {
            log::info!("Attached clarification to reading {}", reading_id);
            return Ok(updated);
        }

        // Nothing updated: tell a missing reading from an already-clarified one.
        match self.store.get(user_id, reading_id).await? {
            None => Err(OracleError::not_found(format!("Reading {} not found", reading_id))),
            Some(_) => Err(OracleError::Conflict(format!(
                "Reading {} already has a clarification",
                reading_id
            ))),
        }
    }
}
