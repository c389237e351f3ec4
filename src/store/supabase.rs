//! Supabase backend over PostgREST and Storage.
//!
//! The anonymous client reads reference texts. Quota and reading handles are
//! cloned with the caller's access token so row-level security applies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::{Backend, ContentStore, QuotaStore, ReadingStore, ReferenceContent};
use crate::auth::Credentials;
use crate::core::coordinate::Coordinate;
use crate::core::reading::Reading;
use crate::quota::{MembershipType, QuotaRecord};
use crate::utilities::config::SupabaseConfig;
use crate::utilities::errors::{OracleError, OracleResult};

/// Storage bucket holding hexagram images.
pub const IMAGE_BUCKET: &str = "iching-images";

const TEXTS_TABLE: &str = "iching_texts";
const QUOTAS_TABLE: &str = "user_quotas";
const READINGS_TABLE: &str = "user_readings";
const QUOTA_COLUMNS: &str = "user_id,membership_type,remaining_queries";

/// Compare-and-swap attempts before a decrement gives up.
const DECREMENT_ATTEMPTS: usize = 5;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Thin PostgREST client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    access_token: Option<String>,
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("url", &self.url)
            .field("authenticated", &self.access_token.is_some())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TextRow {
    parent_text: Option<String>,
    child_text: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> OracleResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OracleError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        log::info!("Supabase client initialized for {}", config.url);
        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: None,
        })
    }

    /// A copy that sends the caller's access token instead of the API key.
    pub fn authenticated(&self, credentials: &Credentials) -> Self {
        log::debug!(
            "Scoping Supabase client to caller (refresh token provided: {})",
            credentials.refresh_token.is_some()
        );
        Self {
            access_token: Some(credentials.access_token.clone()),
            ..self.clone()
        }
    }

    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// Public URL of an object in a public bucket.
    pub fn public_object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.url, bucket, path)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.http
            .request(method, self.rest_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn execute(&self, builder: RequestBuilder) -> OracleResult<String> {
        let response = builder
            .send()
            .await
            .map_err(|e| OracleError::store(format!("Supabase request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::store(format!("Failed to read Supabase response: {}", e)))?;

        match status {
            s if s.is_success() => Ok(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(OracleError::Unauthorized(
                format!("Supabase rejected the request ({}): {}", status, body),
            )),
            _ => Err(OracleError::store(format!("Supabase returned {}: {}", status, body))),
        }
    }

    async fn rows<T: DeserializeOwned>(&self, builder: RequestBuilder) -> OracleResult<Vec<T>> {
        let body = self.execute(builder).await?;
        serde_json::from_str(&body)
            .map_err(|e| OracleError::store(format!("Unexpected Supabase row shape: {}", e)))
    }

    fn eq(value: impl std::fmt::Display) -> String {
        format!("eq.{}", value)
    }
}

// ---------------------------------------------------------------------------
// Store trait impls
// ---------------------------------------------------------------------------

#[async_trait]
impl ContentStore for SupabaseClient {
    async fn fetch(&self, coord: &Coordinate) -> OracleResult<ReferenceContent> {
        let request = self.request(Method::GET, TEXTS_TABLE).query(&[
            ("select", "parent_text,child_text".to_string()),
            ("parent_coord", Self::eq(coord.parent_key())),
            ("child_coord", Self::eq(coord.child_key())),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<TextRow> = self.rows(request).await?;

        match rows.into_iter().next() {
            Some(TextRow {
                parent_text: Some(parent_text),
                child_text: Some(child_text),
            }) if !parent_text.trim().is_empty() && !child_text.trim().is_empty() => {
                Ok(ReferenceContent {
                    parent_text,
                    child_text,
                    image_url: self.public_object_url(IMAGE_BUCKET, &coord.image_object_path()),
                })
            }
            _ => Err(OracleError::not_found(format!("No reference text for {}", coord))),
        }
    }
}

#[async_trait]
impl QuotaStore for SupabaseClient {
    async fn find(&self, user_id: &str) -> OracleResult<Option<QuotaRecord>> {
        let request = self
            .request(Method::GET, QUOTAS_TABLE)
            .query(&[("select", QUOTA_COLUMNS.to_string()), ("user_id", Self::eq(user_id))]);
        let rows: Vec<QuotaRecord> = self.rows(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_if_absent(&self, record: &QuotaRecord) -> OracleResult<()> {
        let request = self
            .request(Method::POST, QUOTAS_TABLE)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(record);
        self.execute(request).await?;
        Ok(())
    }

    async fn decrement_if_positive(&self, user_id: &str) -> OracleResult<Option<i64>> {
        for attempt in 1..=DECREMENT_ATTEMPTS {
            let current = match self.find(user_id).await? {
                None => return Ok(None),
                Some(record) if record.remaining_queries <= 0 => return Ok(Some(0)),
                Some(record) => record.remaining_queries,
            };

            let request = self
                .request(Method::PATCH, QUOTAS_TABLE)
                .query(&[
                    ("user_id", Self::eq(user_id)),
                    ("remaining_queries", Self::eq(current)),
                    ("select", QUOTA_COLUMNS.to_string()),
                ])
                .header("Prefer", "return=representation")
                .json(&serde_json::json!({ "remaining_queries": current - 1 }));
            let rows: Vec<QuotaRecord> = self.rows(request).await?;

            if let Some(updated) = rows.into_iter().next() {
                return Ok(Some(updated.remaining_queries));
            }
            log::debug!(
                "Quota for user {} changed concurrently (attempt {}/{})",
                user_id,
                attempt,
                DECREMENT_ATTEMPTS
            );
        }

        Err(OracleError::Conflict(format!(
            "Quota for user {} is being updated concurrently",
            user_id
        )))
    }

    async fn update_membership(
        &self,
        user_id: &str,
        membership_type: MembershipType,
        remaining_queries: Option<i64>,
    ) -> OracleResult<Option<QuotaRecord>> {
        let mut patch = serde_json::json!({ "membership_type": membership_type });
        if let Some(remaining) = remaining_queries {
            patch["remaining_queries"] = Value::from(remaining);
        }

        let request = self
            .request(Method::PATCH, QUOTAS_TABLE)
            .query(&[("user_id", Self::eq(user_id)), ("select", QUOTA_COLUMNS.to_string())])
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<QuotaRecord> = self.rows(request).await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ReadingStore for SupabaseClient {
    async fn insert(&self, reading: &Reading) -> OracleResult<Reading> {
        let request = self
            .request(Method::POST, READINGS_TABLE)
            .header("Prefer", "return=representation")
            .json(reading);
        let rows: Vec<Reading> = self.rows(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| OracleError::store("Supabase returned no row for inserted reading"))
    }

    async fn list(&self, user_id: &str) -> OracleResult<Vec<Reading>> {
        let request = self.request(Method::GET, READINGS_TABLE).query(&[
            ("select", "*".to_string()),
            ("user_id", Self::eq(user_id)),
            ("order", "created_at.desc".to_string()),
        ]);
        self.rows(request).await
    }

    async fn get(&self, user_id: &str, reading_id: Uuid) -> OracleResult<Option<Reading>> {
        let request = self.request(Method::GET, READINGS_TABLE).query(&[
            ("select", "*".to_string()),
            ("id", Self::eq(reading_id)),
            ("user_id", Self::eq(user_id)),
        ]);
        let rows: Vec<Reading> = self.rows(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn set_clarification(
        &self,
        user_id: &str,
        reading_id: Uuid,
        question: &str,
        answer: &str,
    ) -> OracleResult<Option<Reading>> {
        let request = self
            .request(Method::PATCH, READINGS_TABLE)
            .query(&[
                ("id", Self::eq(reading_id)),
                ("user_id", Self::eq(user_id)),
                ("clarifying_question", "is.null".to_string()),
            ])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({
                "clarifying_question": question,
                "clarifying_answer": answer,
            }));
        let rows: Vec<Reading> = self.rows(request).await?;
        Ok(rows.into_iter().next())
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// [`Backend`] over a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseBackend {
    client: SupabaseClient,
}

impl SupabaseBackend {
    pub fn new(config: &SupabaseConfig) -> OracleResult<Self> {
        Ok(Self {
            client: SupabaseClient::new(config)?,
        })
    }
}

impl Backend for SupabaseBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    fn content(&self) -> Arc<dyn ContentStore> {
        Arc::new(self.client.clone())
    }

    fn quotas(&self, credentials: &Credentials) -> Arc<dyn QuotaStore> {
        Arc::new(self.client.authenticated(credentials))
    }

    fn readings(&self, credentials: &Credentials) -> Arc<dyn ReadingStore> {
        Arc::new(self.client.authenticated(credentials))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
