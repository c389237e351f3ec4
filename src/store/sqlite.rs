//! SQLite backend.
//!
//! One file (or in-memory database) holds all three tables. The connection is
//! shared behind a mutex and every query runs on the blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{Backend, ContentStore, QuotaStore, ReadingStore, ReferenceContent};
use crate::auth::Credentials;
use crate::core::coordinate::Coordinate;
use crate::core::reading::Reading;
use crate::quota::{MembershipType, QuotaRecord};
use crate::utilities::errors::{OracleError, OracleResult};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS iching_texts (
    parent_coord TEXT NOT NULL,
    child_coord TEXT NOT NULL,
    parent_text TEXT,
    child_text TEXT,
    UNIQUE(parent_coord, child_coord)
);

CREATE TABLE IF NOT EXISTS user_quotas (
    user_id TEXT PRIMARY KEY,
    membership_type TEXT NOT NULL,
    remaining_queries INTEGER NOT NULL CHECK (remaining_queries >= 0)
);

CREATE TABLE IF NOT EXISTS user_readings (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    question TEXT NOT NULL,
    first_number INTEGER NOT NULL,
    second_number INTEGER NOT NULL,
    third_number INTEGER NOT NULL,
    language TEXT NOT NULL,
    hexagram_name TEXT NOT NULL,
    summary TEXT NOT NULL,
    interpretation TEXT NOT NULL,
    line_change TEXT NOT NULL,
    result TEXT NOT NULL,
    advice TEXT NOT NULL,
    image_path TEXT NOT NULL,
    clarifying_question TEXT,
    clarifying_answer TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_readings_user
    ON user_readings(user_id, created_at);
";

const READING_COLUMNS: &str = "id, user_id, question, first_number, second_number, third_number, \
    language, hexagram_name, summary, interpretation, line_change, result, advice, image_path, \
    clarifying_question, clarifying_answer, created_at";

/// Default base URL for hexagram images.
pub const DEFAULT_IMAGE_BASE_URL: &str = "http://localhost:8000/images";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed content, quota and reading store.
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    image_base_url: String,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("image_base_url", &self.image_base_url)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> OracleResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OracleError::configuration(format!(
                        "Cannot create directory for '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> OracleResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> OracleResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
        })
    }

    pub fn with_image_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.image_base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Insert or replace the reference texts for one coordinate pair.
    ///
    /// This is how a self-hosted database is seeded with the 64×6 texts;
    /// the HTTP API never writes reference content.
    pub fn insert_content(
        &self,
        parent_coord: &str,
        child_coord: &str,
        parent_text: &str,
        child_text: &str,
    ) -> OracleResult<()> {
        self.conn.lock().execute(
            "INSERT INTO iching_texts (parent_coord, child_coord, parent_text, child_text)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(parent_coord, child_coord)
             DO UPDATE SET parent_text = excluded.parent_text, child_text = excluded.child_text",
            params![parent_coord, child_coord, parent_text, child_text],
        )?;
        Ok(())
    }

    async fn run<T, F>(&self, f: F) -> OracleResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> OracleResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&*guard)
        })
        .await
        .map_err(|e| OracleError::store(format!("SQLite task failed: {}", e)))?
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn quota_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_quota((user_id, membership_type, remaining_queries): (String, String, i64)) -> OracleResult<QuotaRecord> {
    let membership_type: MembershipType = membership_type
        .parse()
        .map_err(|_| OracleError::store(format!("Bad membership_type '{}' for user {}", membership_type, user_id)))?;
    Ok(QuotaRecord {
        user_id,
        membership_type,
        remaining_queries,
    })
}

/// Raw column values of a `user_readings` row.
struct ReadingRow {
    id: String,
    user_id: String,
    question: String,
    numbers: (i64, i64, i64),
    language: String,
    hexagram_name: String,
    summary: String,
    interpretation: String,
    line_change: String,
    result: String,
    advice: String,
    image_path: String,
    clarifying_question: Option<String>,
    clarifying_answer: Option<String>,
    created_at: String,
}

impl ReadingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            question: row.get(2)?,
            numbers: (row.get(3)?, row.get(4)?, row.get(5)?),
            language: row.get(6)?,
            hexagram_name: row.get(7)?,
            summary: row.get(8)?,
            interpretation: row.get(9)?,
            line_change: row.get(10)?,
            result: row.get(11)?,
            advice: row.get(12)?,
            image_path: row.get(13)?,
            clarifying_question: row.get(14)?,
            clarifying_answer: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn into_reading(self) -> OracleResult<Reading> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            OracleError::store(format!("Corrupt {} in reading {}: {}", field, self.id, e))
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt("id", &e))?;
        let line_change = serde_json::from_str(&self.line_change).map_err(|e| corrupt("line_change", &e))?;
        let result = serde_json::from_str(&self.result).map_err(|e| corrupt("result", &e))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt("created_at", &e))?
            .with_timezone(&Utc);

        Ok(Reading {
            id,
            user_id: self.user_id,
            question: self.question,
            first_number: self.numbers.0,
            second_number: self.numbers.1,
            third_number: self.numbers.2,
            language: self.language,
            hexagram_name: self.hexagram_name,
            summary: self.summary,
            interpretation: self.interpretation,
            line_change,
            result,
            advice: self.advice,
            image_path: self.image_path,
            clarifying_question: self.clarifying_question,
            clarifying_answer: self.clarifying_answer,
            created_at,
        })
    }
}

fn select_reading(conn: &Connection, user_id: &str, id: &str) -> OracleResult<Option<Reading>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM user_readings WHERE id = ?1 AND user_id = ?2",
                READING_COLUMNS
            ),
            params![id, user_id],
            ReadingRow::from_row,
        )
        .optional()?;
    row.map(ReadingRow::into_reading).transpose()
}

// ---------------------------------------------------------------------------
// Store trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl ContentStore for SqliteStore {
    async fn fetch(&self, coord: &Coordinate) -> OracleResult<ReferenceContent> {
        let parent_key = coord.parent_key();
        let child_key = coord.child_key();
        let image_url = format!("{}/{}", self.image_base_url, coord.image_object_path());

        let texts = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT parent_text, child_text FROM iching_texts
                         WHERE parent_coord = ?1 AND child_coord = ?2",
                        params![parent_key, child_key],
                        |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        match texts {
            Some((Some(parent_text), Some(child_text)))
                if !parent_text.trim().is_empty() && !child_text.trim().is_empty() =>
            {
                Ok(ReferenceContent {
                    parent_text,
                    child_text,
                    image_url,
                })
            }
            _ => Err(OracleError::not_found(format!("No reference text for {}", coord))),
        }
    }
}

#[async_trait]
impl QuotaStore for SqliteStore {
    async fn find(&self, user_id: &str) -> OracleResult<Option<QuotaRecord>> {
        let user_id = user_id.to_string();
        let raw = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT user_id, membership_type, remaining_queries
                         FROM user_quotas WHERE user_id = ?1",
                        params![user_id],
                        quota_from_row,
                    )
                    .optional()?)
            })
            .await?;
        raw.map(into_quota).transpose()
    }

    async fn insert_if_absent(&self, record: &QuotaRecord) -> OracleResult<()> {
        let record = record.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_quotas (user_id, membership_type, remaining_queries)
                 VALUES (?1, ?2, ?3)",
                params![record.user_id, record.membership_type.as_str(), record.remaining_queries],
            )?;
            Ok(())
        })
        .await
    }

    async fn decrement_if_positive(&self, user_id: &str) -> OracleResult<Option<i64>> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let decremented: Option<i64> = conn
                .query_row(
                    "UPDATE user_quotas SET remaining_queries = remaining_queries - 1
                     WHERE user_id = ?1 AND remaining_queries > 0
                     RETURNING remaining_queries",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if decremented.is_some() {
                return Ok(decremented);
            }
            // Either at the floor or no row at all.
            Ok(conn
                .query_row(
                    "SELECT remaining_queries FROM user_quotas WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn update_membership(
        &self,
        user_id: &str,
        membership_type: MembershipType,
        remaining_queries: Option<i64>,
    ) -> OracleResult<Option<QuotaRecord>> {
        let user_id = user_id.to_string();
        let raw = self
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE user_quotas
                         SET membership_type = ?2,
                             remaining_queries = COALESCE(?3, remaining_queries)
                         WHERE user_id = ?1
                         RETURNING user_id, membership_type, remaining_queries",
                        params![user_id, membership_type.as_str(), remaining_queries],
                        quota_from_row,
                    )
                    .optional()?)
            })
            .await?;
        raw.map(into_quota).transpose()
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn insert(&self, reading: &Reading) -> OracleResult<Reading> {
        let reading = reading.clone();
        let line_change = serde_json::to_string(&reading.line_change)
            .map_err(|e| OracleError::store(format!("Cannot encode line_change: {}", e)))?;
        let result = serde_json::to_string(&reading.result)
            .map_err(|e| OracleError::store(format!("Cannot encode result: {}", e)))?;

        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO user_readings ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                    READING_COLUMNS
                ),
                params![
                    reading.id.to_string(),
                    reading.user_id,
                    reading.question,
                    reading.first_number,
                    reading.second_number,
                    reading.third_number,
                    reading.language,
                    reading.hexagram_name,
                    reading.summary,
                    reading.interpretation,
                    line_change,
                    result,
                    reading.advice,
                    reading.image_path,
                    reading.clarifying_question,
                    reading.clarifying_answer,
                    reading.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(reading)
        })
        .await
    }

    async fn list(&self, user_id: &str) -> OracleResult<Vec<Reading>> {
        let user_id = user_id.to_string();
        let rows = self
            .run(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM user_readings WHERE user_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    READING_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![user_id], ReadingRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(ReadingRow::into_reading).collect()
    }

    async fn get(&self, user_id: &str, reading_id: Uuid) -> OracleResult<Option<Reading>> {
        let user_id = user_id.to_string();
        self.run(move |conn| select_reading(conn, &user_id, &reading_id.to_string()))
            .await
    }

    async fn set_clarification(
        &self,
        user_id: &str,
        reading_id: Uuid,
        question: &str,
        answer: &str,
    ) -> OracleResult<Option<Reading>> {
        let user_id = user_id.to_string();
        let question = question.to_string();
        let answer = answer.to_string();
        self.run(move |conn| {
            let id = reading_id.to_string();
            let changed = conn.execute(
                "UPDATE user_readings SET clarifying_question = ?3, clarifying_answer = ?4
                 WHERE id = ?1 AND user_id = ?2 AND clarifying_question IS NULL",
                params![id, user_id, question, answer],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_reading(conn, &user_id, &id)
        })
        .await
    }
}

impl Backend for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn content(&self) -> Arc<dyn ContentStore> {
        Arc::new(self.clone())
    }

    fn quotas(&self, _credentials: &Credentials) -> Arc<dyn QuotaStore> {
        Arc::new(self.clone())
    }

    fn readings(&self, _credentials: &Credentials) -> Arc<dyn ReadingStore> {
        Arc::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinate::resolve;
    use crate::core::reading::ReadingRequest;
    use crate::test_support::sample_response;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory()
            .unwrap()
            .with_image_base_url("https://cdn.example/")
    }

    fn reading(user: &str) -> Reading {
        Reading::new(user, &ReadingRequest::new("Should I move?", 3, 11, 7), &sample_response())
    }

    #[tokio::test]
    async fn test_fetch_content() {
        let store = store();
        store.insert_content("3-3", "1", "Parent text", "Child text").unwrap();

        let content = store.fetch(&resolve(3, 11, 7)).await.unwrap();
        assert_eq!(content.parent_text, "Parent text");
        assert_eq!(content.child_text, "Child text");
        assert_eq!(content.image_url, "https://cdn.example/3-3/1/hexagram.jpg");
    }

    #[tokio::test]
    async fn test_fetch_missing_content_is_not_found() {
        let store = store();
        store.insert_content("3-3", "1", "Parent text", "Child text").unwrap();

        let err = store.fetch(&resolve(3, 11, 2)).await.unwrap_err();
        assert!(matches!(err, OracleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_blank_text_is_not_found() {
        let store = store();
        store.insert_content("0-0", "0", "Parent", "").unwrap();
        let err = store.fetch(&resolve(0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, OracleError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_decrement_returns_none_without_row() {
        let store = store();
        assert_eq!(store.decrement_if_positive("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_if_absent_ignores_duplicate() {
        let store = store();
        let record = QuotaRecord {
            user_id: "u1".into(),
            membership_type: MembershipType::Free,
            remaining_queries: 10,
        };
        store.insert_if_absent(&record).await.unwrap();
        store
            .insert_if_absent(&QuotaRecord {
                remaining_queries: 3,
                ..record.clone()
            })
            .await
            .unwrap();
        assert_eq!(store.find("u1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_update_membership_keeps_count_when_not_given() {
        let store = store();
        store
            .insert_if_absent(&QuotaRecord {
                user_id: "u1".into(),
                membership_type: MembershipType::Premium,
                remaining_queries: 7,
            })
            .await
            .unwrap();

        let updated = store
            .update_membership("u1", MembershipType::Free, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.membership_type, MembershipType::Free);
        assert_eq!(updated.remaining_queries, 7);

        assert!(store
            .update_membership("ghost", MembershipType::Free, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_reading_insert_and_get_scoped_to_owner() {
        let store = store();
        let saved = store.insert(&reading("alice")).await.unwrap();

        let loaded = store.get("alice", saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.line_change, saved.line_change);
        assert_eq!(loaded.result, saved.result);
        assert_eq!(loaded.created_at.timestamp(), saved.created_at.timestamp());

        assert!(store.get("bob", saved.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = store();
        let mut older = reading("alice");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        let older = store.insert(&older).await.unwrap();
        let newer = store.insert(&reading("alice")).await.unwrap();
        store.insert(&reading("bob")).await.unwrap();

        let ids: Vec<Uuid> = store.list("alice").await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn test_set_clarification_only_once() {
        let store = store();
        let saved = store.insert(&reading("alice")).await.unwrap();

        let updated = store
            .set_clarification("alice", saved.id, "When?", "Spring.")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.clarifying_answer.as_deref(), Some("Spring."));

        assert!(store
            .set_clarification("alice", saved.id, "Again?", "No.")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .set_clarification("bob", saved.id, "Mine?", "No.")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("oracle.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_content("1-2", "3", "P", "C").unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.fetch(&resolve(1, 2, 3)).await.is_ok());
    }
}
