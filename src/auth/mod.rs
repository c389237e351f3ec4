//! Caller authentication.
//!
//! Every user-scoped route carries `Authorization: Bearer <access token>` and,
//! optionally, `X-Refresh-Token`. The token pair is parsed into
//! [`Credentials`] and verified by an [`AuthProvider`], which yields the
//! [`AuthenticatedUser`] whose id scopes all quota and history operations.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};

use crate::utilities::config::SupabaseConfig;
use crate::utilities::errors::{OracleError, OracleResult};

/// Header carrying the optional refresh token.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// The caller's token pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"***")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Read the bearer token and optional refresh token from request headers.
    ///
    /// # Errors
    /// [`OracleError::Unauthorized`] when the `Authorization` header is
    /// missing, not a `Bearer` credential, or empty.
    pub fn from_headers(headers: &HeaderMap) -> OracleResult<Self> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| OracleError::Unauthorized("Missing Authorization header".into()))?
            .to_str()
            .map_err(|_| OracleError::Unauthorized("Malformed Authorization header".into()))?;

        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OracleError::Unauthorized("Expected a Bearer token".into()))?;

        let refresh_token = headers
            .get(REFRESH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(Self {
            access_token: token.to_string(),
            refresh_token,
        })
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies credentials and returns the caller's identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> OracleResult<AuthenticatedUser>;
}

/// Verifies access tokens against the Supabase auth service.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl SupabaseAuth {
    pub fn new(config: &SupabaseConfig) -> OracleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OracleError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn user_endpoint(&self) -> String {
        format!("{}/auth/v1/user", self.url)
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn verify(&self, credentials: &Credentials) -> OracleResult<AuthenticatedUser> {
        let response = self
            .client
            .get(self.user_endpoint())
            .header("apikey", &self.api_key)
            .bearer_auth(&credentials.access_token)
            .send()
            .await
            .map_err(|e| OracleError::store(format!("Supabase auth request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("Supabase auth rejected token ({})", status);
            return Err(OracleError::Unauthorized("Invalid authentication credentials".into()));
        }

        let user: AuthenticatedUser = response
            .json()
            .await
            .map_err(|e| OracleError::store(format!("Unexpected Supabase auth response: {}", e)))?;
        log::debug!("Authenticated user {}", user.id);
        Ok(user)
    }
}

/// Treats the bearer token itself as the user id.
///
/// Only for local development and tests against the SQLite backend.
#[derive(Debug, Clone, Default)]
pub struct BearerIdentityAuth;

#[async_trait]
impl AuthProvider for BearerIdentityAuth {
    async fn verify(&self, credentials: &Credentials) -> OracleResult<AuthenticatedUser> {
        Ok(AuthenticatedUser {
            id: credentials.access_token.clone(),
            email: None,
        })
    }
}
