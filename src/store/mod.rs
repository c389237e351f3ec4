//! Storage seams.
//!
//! Each external table the service touches sits behind a trait:
//!
//! - [`ContentStore`] - read-only reference texts and hexagram images
//! - [`QuotaStore`] - one [`QuotaRecord`] per user
//! - [`ReadingStore`] - the reading history
//!
//! [`Backend`] hands out handles to those stores. The Supabase backend scopes
//! the quota and reading handles to the caller's [`Credentials`] so row-level
//! security applies; the SQLite backend shares one connection.

pub mod local;
pub mod sqlite;
pub mod supabase;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Credentials;
use crate::core::coordinate::Coordinate;
use crate::core::reading::Reading;
use crate::quota::{MembershipType, QuotaRecord};
use crate::utilities::errors::OracleResult;

pub use local::LocalContentStore;
pub use sqlite::SqliteStore;
pub use supabase::{SupabaseBackend, SupabaseClient};

/// Everything looked up for one coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceContent {
    pub parent_text: String,
    pub child_text: String,
    pub image_url: String,
}

/// Read-only reference data keyed by coordinate.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch the texts and image for `coord`.
    ///
    /// # Errors
    /// [`OracleError::NotFound`](crate::utilities::errors::OracleError::NotFound)
    /// when no complete record exists for the coordinate.
    async fn fetch(&self, coord: &Coordinate) -> OracleResult<ReferenceContent>;
}

/// Per-user quota rows, unique on `user_id`.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn find(&self, user_id: &str) -> OracleResult<Option<QuotaRecord>>;

    /// Insert `record` unless a row for the user already exists. A duplicate
    /// is not an error.
    async fn insert_if_absent(&self, record: &QuotaRecord) -> OracleResult<()>;

    /// Atomically decrement `remaining_queries` when it is above zero.
    ///
    /// Returns the resulting count (unchanged `0` at the floor), or `None`
    /// when the user has no row.
    async fn decrement_if_positive(&self, user_id: &str) -> OracleResult<Option<i64>>;

    /// Set the membership type and, when given, the remaining count.
    ///
    /// Returns the updated row, or `None` when the user has no row.
    async fn update_membership(
        &self,
        user_id: &str,
        membership_type: MembershipType,
        remaining_queries: Option<i64>,
    ) -> OracleResult<Option<QuotaRecord>>;
}

/// Reading history rows.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: &Reading) -> OracleResult<Reading>;

    /// All readings of `user_id`, newest first.
    async fn list(&self, user_id: &str) -> OracleResult<Vec<Reading>>;

    /// One reading, only if it belongs to `user_id`.
    async fn get(&self, user_id: &str, reading_id: Uuid) -> OracleResult<Option<Reading>>;

    /// Attach the clarifying pair when none is present yet.
    ///
    /// Returns `None` when the reading does not exist for the user or already
    /// carries a clarification.
    async fn set_clarification(
        &self,
        user_id: &str,
        reading_id: Uuid,
        question: &str,
        answer: &str,
    ) -> OracleResult<Option<Reading>>;
}

/// Source of store handles for a request.
pub trait Backend: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    fn content(&self) -> Arc<dyn ContentStore>;

    fn quotas(&self, credentials: &Credentials) -> Arc<dyn QuotaStore>;

    fn readings(&self, credentials: &Credentials) -> Arc<dyn ReadingStore>;
}
