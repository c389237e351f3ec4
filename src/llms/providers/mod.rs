//! LLM provider implementations.
//!
//! Each provider implements [`LlmClient`](crate::llms::base_llm::LlmClient)
//! and owns its authentication, request formatting and error mapping.

pub mod openai;

pub use openai::OpenAICompletion;
