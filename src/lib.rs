//! # I Ching Oracle
//!
//! An HTTP service that turns a question and three numbers into an I Ching
//! reading. The numbers select one of 64 hexagrams and one of its six lines;
//! the matching reference texts ground a single structured LLM call whose
//! answer is returned with the hexagram image.
//!
//! Around that core sit per-user query quotas, a reading history with one
//! optional clarifying exchange per reading, and follow-up conversations.
//! State lives in Supabase (PostgREST, Storage and Auth) or in a local SQLite
//! file.

pub mod auth;
pub mod core;
pub mod generator;
pub mod history;
pub mod llms;
pub mod quota;
pub mod server;
pub mod store;
pub mod utilities;

pub use crate::core::{Oracle, OracleResponse, Prediction, Reading, ReadingRequest};
pub use auth::{AuthProvider, Credentials};
pub use generator::{PromptTemplates, ReadingGenerator};
pub use history::ReadingHistory;
pub use quota::{MembershipType, QuotaLedger, QuotaPlans, QuotaRecord, QuotaStatus};
pub use utilities::config::OracleConfig;
pub use utilities::errors::{OracleError, OracleResult};

/// Service version reported by `/health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
