//! LLM access for the reading generator.
//!
//! - [`base_llm`] - the [`LlmClient`] trait and chat message types
//! - [`providers`] - concrete providers (OpenAI)

pub mod base_llm;
pub mod providers;

pub use base_llm::{ChatMessage, LlmClient, OutputSchema, Role};
