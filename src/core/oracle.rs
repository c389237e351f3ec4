//! The oracle pipeline.
//!
//! `resolve → fetch → generate → attach image`. Quota is the caller's
//! concern: the oracle never reads or writes it, so a failed reading costs
//! nothing.

use std::sync::Arc;

use crate::core::coordinate::resolve;
use crate::core::output::OracleResponse;
use crate::core::reading::ReadingRequest;
use crate::generator::ReadingGenerator;
use crate::llms::base_llm::ChatMessage;
use crate::store::ContentStore;
use crate::utilities::errors::{OracleError, OracleResult};

/// Produces readings from reference content and an LLM.
#[derive(Clone)]
pub struct Oracle {
    content: Arc<dyn ContentStore>,
    generator: ReadingGenerator,
}

impl Oracle {
    pub fn new(content: Arc<dyn ContentStore>, generator: ReadingGenerator) -> Self {
        Self { content, generator }
    }

    /// Produce a reading for `request`.
    ///
    /// # Errors
    /// - [`OracleError::InvalidInput`] for a blank question or language.
    /// - [`OracleError::NotFound`] when the coordinate has no reference
    ///   content; the LLM is not called.
    /// - [`OracleError::Generation`] when the LLM fails or its output does
    ///   not match the schema.
    pub async fn get_reading(&self, request: &ReadingRequest) -> OracleResult<OracleResponse> {
        request.validate()?;

        let coord = resolve(request.first_number, request.second_number, request.third_number);
        log::info!(
            "Reading for ({}, {}, {}) resolved to {} in {}",
            request.first_number,
            request.second_number,
            request.third_number,
            coord,
            request.language
        );

        let content = self.content.fetch(&coord).await?;
        log::debug!(
            "Reference content for {}: parent {} chars, child {} chars",
            coord,
            content.parent_text.chars().count(),
            content.child_text.chars().count()
        );

        let prediction = self
            .generator
            .generate(
                &request.question,
                &content.parent_text,
                &content.child_text,
                &request.language,
            )
            .await
            .map_err(|e| {
                log::error!("Reading generation failed for {}: {}", coord, e);
                e
            })?;

        Ok(OracleResponse {
            prediction,
            image_path: content.image_url,
        })
    }

    /// Answer a follow-up question within an existing conversation.
    pub async fn get_follow_up(&self, history: &[ChatMessage], question: &str) -> OracleResult<String> {
        if question.trim().is_empty() {
            return Err(OracleError::InvalidInput("Question must not be empty".into()));
        }
        log::info!("Follow-up question with {} prior messages", history.len());
        self.generator.follow_up(history, question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::PromptTemplates;
    use crate::quota::{QuotaLedger, QuotaPlans};
    use crate::test_support::{sample_prediction_json, seeded_store, StubLlm};

    fn oracle(llm: Arc<StubLlm>) -> Oracle {
        Oracle::new(
            Arc::new(seeded_store()),
            ReadingGenerator::new(llm, PromptTemplates::default()),
        )
    }

    #[tokio::test]
    async fn test_get_reading_attaches_image() {
        let llm = Arc::new(StubLlm::with_structured(sample_prediction_json()));
        let response = oracle(llm.clone())
            .get_reading(&ReadingRequest::new("Should I move?", 3, 11, 7))
            .await
            .unwrap();

        assert_eq!(response.prediction.hexagram_name, "Qian");
        assert_eq!(response.image_path, "https://cdn.example/3-3/1/hexagram.jpg");

        let system = &llm.calls()[0][0].content;
        assert!(system.contains("The Creative"));
        assert!(system.contains("Nine in the second place"));
    }

    #[tokio::test]
    async fn test_negative_inputs_resolve_into_grid() {
        let llm = Arc::new(StubLlm::with_structured(sample_prediction_json()));
        // -5 mod 8 = 3, -13 mod 8 = 3, -5 mod 6 = 1
        let response = oracle(llm)
            .get_reading(&ReadingRequest::new("q", -5, -13, -5))
            .await
            .unwrap();
        assert!(response.image_path.ends_with("3-3/1/hexagram.jpg"));
    }

    #[tokio::test]
    async fn test_missing_content_skips_llm() {
        let llm = Arc::new(StubLlm::with_structured(sample_prediction_json()));
        let err = oracle(llm.clone())
            .get_reading(&ReadingRequest::new("q", 1, 1, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, OracleError::NotFound(_)));
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_rejected_before_lookup() {
        let llm = Arc::new(StubLlm::with_structured(sample_prediction_json()));
        let err = oracle(llm.clone())
            .get_reading(&ReadingRequest::new(" ", 3, 11, 7))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::InvalidInput(_)));
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reading_leaves_quota_untouched() {
        let store = seeded_store();
        let ledger = QuotaLedger::new(Arc::new(store.clone()), QuotaPlans::default());
        ledger.get_or_create("u1").await.unwrap();

        let oracle = Oracle::new(
            Arc::new(store),
            ReadingGenerator::new(Arc::new(StubLlm::failing()), PromptTemplates::default()),
        );
        let result = oracle.get_reading(&ReadingRequest::new("q", 3, 11, 7)).await;
        assert!(matches!(result, Err(OracleError::Generation(_))));

        assert_eq!(ledger.get_or_create("u1").await.unwrap().remaining_queries, 10);
    }

    #[tokio::test]
    async fn test_successful_reading_then_decrement_costs_one() {
        let store = seeded_store();
        let ledger = QuotaLedger::new(Arc::new(store.clone()), QuotaPlans::default());
        let before = ledger.get_or_create("u1").await.unwrap().remaining_queries;

        let oracle = Oracle::new(
            Arc::new(store),
            ReadingGenerator::new(
                Arc::new(StubLlm::with_structured(sample_prediction_json())),
                PromptTemplates::default(),
            ),
        );
        oracle.get_reading(&ReadingRequest::new("q", 3, 11, 7)).await.unwrap();
        let after = ledger.decrement("u1").await.unwrap();

        assert_eq!(after, before - 1);
    }

    #[tokio::test]
    async fn test_follow_up_returns_text() {
        let llm = Arc::new(StubLlm::with_text("Wait for spring."));
        let answer = oracle(llm)
            .get_follow_up(&[ChatMessage::user("Should I move?")], "When?")
            .await
            .unwrap();
        assert_eq!(answer, "Wait for spring.");
    }

    #[tokio::test]
    async fn test_follow_up_blank_question() {
        let llm = Arc::new(StubLlm::with_text("x"));
        let err = oracle(llm.clone()).get_follow_up(&[], "").await.unwrap_err();
        assert!(matches!(err, OracleError::InvalidInput(_)));
        assert!(llm.calls().is_empty());
    }
}
