//! Axum route handlers for the oracle HTTP API.
//!
//! # Routes
//!
//! - `GET  /`                      - Banner
//! - `GET  /health`                - `{"status": "healthy", "version": ...}`
//! - `GET  /languages`             - Supported reading languages
//! - `POST /oracle`                - Produce a reading
//! - `POST /oracle/followup`       - Answer a follow-up question
//! - `GET  /user/readings`         - The caller's readings, newest first
//! - `GET  /user/readings/:id`     - One of the caller's readings
//! - `POST /user/readings`         - Save a reading
//! - `POST /user/readings/update`  - Attach a clarifying question and answer
//! - `GET  /user/quota`            - Quota status
//! - `POST /user/quota/decrement`  - Consume one query
//! - `POST /user/quota/update`     - Change membership type
//! - `GET  /images/*`              - Hexagram images, when an image directory is configured
//!
//! Every `/oracle` and `/user` route requires `Authorization: Bearer <token>`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::auth::{AuthProvider, AuthenticatedUser, Credentials};
use crate::core::output::{HexagramResult, LineChange, OracleResponse, Prediction};
use crate::core::reading::{Reading, ReadingRequest, DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};
use crate::core::Oracle;
use crate::history::ReadingHistory;
use crate::llms::base_llm::ChatMessage;
use crate::quota::{MembershipType, QuotaLedger, QuotaPlans, QuotaStatus};
use crate::store::Backend;
use crate::utilities::config::IMAGE_ROUTE;
use crate::utilities::errors::{OracleError, OracleResult};

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub oracle: Oracle,
    /// Source of per-request quota and reading stores.
    pub backend: Arc<dyn Backend>,
    pub auth: Arc<dyn AuthProvider>,
    pub plans: QuotaPlans,
    /// Served at `/images` when set.
    pub image_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        oracle: Oracle,
        backend: Arc<dyn Backend>,
        auth: Arc<dyn AuthProvider>,
        plans: QuotaPlans,
    ) -> Self {
        Self {
            oracle,
            backend,
            auth,
            plans,
            image_dir: None,
        }
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    async fn authenticate(&self, headers: &HeaderMap) -> OracleResult<(Credentials, AuthenticatedUser)> {
        let credentials = Credentials::from_headers(headers)?;
        let user = self.auth.verify(&credentials).await?;
        Ok((credentials, user))
    }

    fn ledger(&self, credentials: &Credentials) -> QuotaLedger {
        QuotaLedger::new(self.backend.quotas(credentials), self.plans)
    }

    fn history(&self, credentials: &Credentials) -> ReadingHistory {
        ReadingHistory::new(self.backend.readings(credentials))
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/languages", get(languages_handler))
        .route("/oracle", post(oracle_handler))
        .route("/oracle/followup", post(follow_up_handler))
        .route("/user/readings", get(list_readings_handler).post(save_reading_handler))
        .route("/user/readings/update", post(update_reading_handler))
        .route("/user/readings/:id", get(get_reading_handler))
        .route("/user/quota", get(quota_handler))
        .route("/user/quota/decrement", post(decrement_quota_handler))
        .route("/user/quota/update", post(update_quota_handler));

    if let Some(dir) = &state.image_dir {
        router = router.nest_service(IMAGE_ROUTE, ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> OracleResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| OracleError::InvalidInput(e.body_text()))
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of `POST /oracle/followup`.
#[derive(Debug, Deserialize)]
pub struct FollowUpBody {
    pub question: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

/// Body of `POST /user/readings`: the request that produced a reading plus
/// the reading returned by `/oracle`.
#[derive(Debug, Deserialize)]
pub struct SaveReadingBody {
    pub question: String,
    pub first_number: i64,
    pub second_number: i64,
    pub third_number: i64,
    #[serde(default)]
    pub language: Option<String>,
    pub hexagram_name: String,
    pub summary: String,
    pub interpretation: String,
    pub line_change: LineChange,
    pub result: HexagramResult,
    pub advice: String,
    pub image_path: String,
}

impl SaveReadingBody {
    fn into_parts(self) -> (ReadingRequest, OracleResponse) {
        let request = ReadingRequest::new(
            self.question,
            self.first_number,
            self.second_number,
            self.third_number,
        )
        .with_language(self.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()));

        let response = OracleResponse {
            prediction: Prediction {
                hexagram_name: self.hexagram_name,
                summary: self.summary,
                interpretation: self.interpretation,
                line_change: self.line_change,
                result: self.result,
                advice: self.advice,
            },
            image_path: self.image_path,
        };
        (request, response)
    }
}

/// Body of `POST /user/readings/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateReadingBody {
    pub reading_id: String,
    pub clarifying_question: String,
    pub clarifying_answer: String,
}

/// Body of `POST /user/quota/update`.
#[derive(Debug, Deserialize)]
pub struct UpdateQuotaBody {
    pub membership_type: String,
}

// ---------------------------------------------------------------------------
// Public handlers
// ---------------------------------------------------------------------------

/// GET / - banner.
async fn root_handler() -> Json<Value> {
    Json(serde_json::json!({ "message": "Oracle I Ching API is running" }))
}

/// GET /health - liveness check.
async fn health_handler() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

/// GET /languages
async fn languages_handler() -> Json<Value> {
    Json(serde_json::json!({ "languages": SUPPORTED_LANGUAGES }))
}

// ---------------------------------------------------------------------------
// Oracle handlers
// ---------------------------------------------------------------------------

/// POST /oracle - produce a reading. Quota is not touched here; the client
/// decrements it after a successful reading.
async fn oracle_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ReadingRequest>, JsonRejection>,
) -> Result<Json<OracleResponse>, OracleError> {
    let (_, user) = state.authenticate(&headers).await?;
    let request = body(payload)?;
    tracing::info!(user_id = %user.id, language = %request.language, "Oracle reading requested");

    let response = state.oracle.get_reading(&request).await?;
    tracing::info!(user_id = %user.id, hexagram = %response.prediction.hexagram_name, "Oracle reading produced");
    Ok(Json(response))
}

/// POST /oracle/followup
async fn follow_up_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<FollowUpBody>, JsonRejection>,
) -> Result<Json<Value>, OracleError> {
    let (_, user) = state.authenticate(&headers).await?;
    let request = body(payload)?;
    tracing::info!(
        user_id = %user.id,
        history = request.conversation_history.len(),
        "Follow-up requested"
    );

    let answer = state
        .oracle
        .get_follow_up(&request.conversation_history, &request.question)
        .await?;
    Ok(Json(serde_json::json!({ "response": answer, "success": true })))
}

// ---------------------------------------------------------------------------
// Reading history handlers
// ---------------------------------------------------------------------------

/// GET /user/readings
async fn list_readings_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Reading>>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let readings = state.history(&credentials).list(&user.id).await?;
    Ok(Json(readings))
}

/// GET /user/readings/:id
async fn get_reading_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Reading>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    // A malformed id cannot name an existing reading.
    let reading_id = Uuid::parse_str(&id)
        .map_err(|_| OracleError::not_found(format!("Reading {} not found", id)))?;
    let reading = state.history(&credentials).get(&user.id, reading_id).await?;
    Ok(Json(reading))
}

/// POST /user/readings
async fn save_reading_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SaveReadingBody>, JsonRejection>,
) -> Result<Json<Value>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let (request, response) = body(payload)?.into_parts();
    request.validate()?;
    if let Some(field) = response.prediction.blank_field() {
        return Err(OracleError::InvalidInput(format!("Field '{}' must not be empty", field)));
    }

    let reading = state
        .history(&credentials)
        .save(&user.id, &request, &response)
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "data": reading })))
}

/// POST /user/readings/update
async fn update_reading_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UpdateReadingBody>, JsonRejection>,
) -> Result<Json<Value>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let update = body(payload)?;
    let reading_id = Uuid::parse_str(&update.reading_id).map_err(|_| {
        OracleError::InvalidInput(format!("'{}' is not a valid reading id", update.reading_id))
    })?;

    let reading = state
        .history(&credentials)
        .attach_clarification(
            &user.id,
            reading_id,
            &update.clarifying_question,
            &update.clarifying_answer,
        )
        .await?;
    Ok(Json(serde_json::json!({ "success": true, "data": reading })))
}

// ---------------------------------------------------------------------------
// Quota handlers
// ---------------------------------------------------------------------------

/// GET /user/quota
async fn quota_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QuotaStatus>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let status = state.ledger(&credentials).status(&user.id).await?;
    Ok(Json(status))
}

/// POST /user/quota/decrement
async fn decrement_quota_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let remaining = state.ledger(&credentials).decrement(&user.id).await?;
    Ok(Json(serde_json::json!({ "remaining_queries": remaining })))
}

/// POST /user/quota/update
async fn update_quota_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UpdateQuotaBody>, JsonRejection>,
) -> Result<Json<Value>, OracleError> {
    let (credentials, user) = state.authenticate(&headers).await?;
    let membership_type: MembershipType = body(payload)?.membership_type.parse()?;
    tracing::info!(user_id = %user.id, %membership_type, "Updating membership");

    let record = state
        .ledger(&credentials)
        .set_membership(&user.id, membership_type)
        .await?;
    Ok(Json(serde_json::json!({ "status": "success", "data": record })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BearerIdentityAuth;
    use crate::generator::{PromptTemplates, ReadingGenerator};
    use crate::store::SqliteStore;
    use crate::test_support::{sample_prediction_json, seeded_store, StubLlm};
    use crate::utilities::config::OracleConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state_with(llm: StubLlm) -> AppState {
        let store = seeded_store();
        let oracle = Oracle::new(
            Arc::new(store.clone()),
            ReadingGenerator::new(Arc::new(llm), PromptTemplates::default()),
        );
        AppState::new(oracle, Arc::new(store), Arc::new(BearerIdentityAuth), QuotaPlans::default())
    }

    fn state() -> AppState {
        state_with(StubLlm::with_structured(sample_prediction_json()))
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn reading_request() -> Value {
        serde_json::json!({
            "question": "Should I move?",
            "first_number": 3,
            "second_number": 11,
            "third_number": 7,
        })
    }

    #[tokio::test]
    async fn test_public_endpoints() {
        let state = state();
        let (status, json) = call(&state, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Oracle I Ching API is running");

        let (_, json) = call(&state, "GET", "/health", None, None).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], crate::VERSION);

        let (_, json) = call(&state, "GET", "/languages", None, None).await;
        assert_eq!(json["languages"], serde_json::json!(["English", "Chinese"]));
    }

    #[tokio::test]
    async fn test_user_routes_require_bearer() {
        let state = state();
        for (method, uri) in [
            ("GET", "/user/quota"),
            ("GET", "/user/readings"),
            ("POST", "/user/quota/decrement"),
        ] {
            let (status, json) = call(&state, method, uri, None, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{} {}", method, uri);
            assert!(json["error"].as_str().unwrap().starts_with("Unauthorized"));
        }

        let (status, _) = call(&state, "POST", "/oracle", None, Some(reading_request())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oracle_reading() {
        let state = state();
        let (status, json) = call(&state, "POST", "/oracle", Some("u1"), Some(reading_request())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hexagram_name"], "Qian");
        assert_eq!(json["image_path"], "https://cdn.example/3-3/1/hexagram.jpg");
        assert_eq!(json["line_change"]["line"], sample_prediction_json()["line_change"]["line"]);
    }

    #[tokio::test]
    async fn test_oracle_missing_content_is_404() {
        let state = state();
        let mut request = reading_request();
        request["third_number"] = serde_json::json!(2);
        let (status, _) = call(&state, "POST", "/oracle", Some("u1"), Some(request)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oracle_generation_failure_is_500() {
        let state = state_with(StubLlm::failing());
        let (status, json) = call(&state, "POST", "/oracle", Some("u1"), Some(reading_request())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().starts_with("Generation error"));
    }

    #[tokio::test]
    async fn test_oracle_malformed_body_is_400() {
        let state = state();
        let (status, json) = call(
            &state,
            "POST",
            "/oracle",
            Some("u1"),
            Some(serde_json::json!({"question": "q", "first_number": "one"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_follow_up() {
        let state = state_with(StubLlm::with_text("Wait until spring."));
        let (status, json) = call(
            &state,
            "POST",
            "/oracle/followup",
            Some("u1"),
            Some(serde_json::json!({
                "question": "When?",
                "conversation_history": [
                    {"role": "user", "content": "Should I move?"},
                    {"role": "assistant", "content": "Qian advises persistence."}
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"], "Wait until spring.");
        assert_eq!(json["success"], true);
    }

    #[tokio::test]
    async fn test_quota_lifecycle() {
        let state = state();

        let (status, json) = call(&state, "GET", "/user/quota", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["membership_type"], "free");
        assert_eq!(json["remaining_queries"], 10);
        assert_eq!(json["max_queries"], 10);
        assert_eq!(json["low_quota"], false);

        let (_, json) = call(&state, "POST", "/user/quota/decrement", Some("u1"), None).await;
        assert_eq!(json["remaining_queries"], 9);

        let (status, json) = call(
            &state,
            "POST",
            "/user/quota/update",
            Some("u1"),
            Some(serde_json::json!({"membership_type": "premium"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"]["remaining_queries"], 50);
    }

    #[tokio::test]
    async fn test_quota_update_errors() {
        let state = state();
        let (status, _) = call(
            &state,
            "POST",
            "/user/quota/update",
            Some("ghost"),
            Some(serde_json::json!({"membership_type": "premium"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &state,
            "POST",
            "/user/quota/update",
            Some("ghost"),
            Some(serde_json::json!({"membership_type": "gold"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reading_history_flow() {
        let state = state();
        let (_, reading) = call(&state, "POST", "/oracle", Some("alice"), Some(reading_request())).await;

        let mut save = reading_request();
        for (key, value) in reading.as_object().unwrap() {
            save[key] = value.clone();
        }
        let (status, json) = call(&state, "POST", "/user/readings", Some("alice"), Some(save)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        let id = json["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(json["data"]["user_id"], "alice");
        assert_eq!(json["data"]["language"], "English");

        let (_, list) = call(&state, "GET", "/user/readings", Some("alice"), None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = call(&state, "GET", &format!("/user/readings/{}", id), Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let update = serde_json::json!({
            "reading_id": id,
            "clarifying_question": "When?",
            "clarifying_answer": "In spring.",
        });
        let (status, json) =
            call(&state, "POST", "/user/readings/update", Some("alice"), Some(update.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["clarifying_answer"], "In spring.");

        let (status, _) = call(&state, "POST", "/user/readings/update", Some("alice"), Some(update)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, json) =
            call(&state, "GET", &format!("/user/readings/{}", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["clarifying_question"], "When?");
    }

    #[tokio::test]
    async fn test_malformed_reading_id() {
        let state = state();
        let (status, _) = call(&state, "GET", "/user/readings/not-a-uuid", Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &state,
            "POST",
            "/user/readings/update",
            Some("u1"),
            Some(serde_json::json!({
                "reading_id": "not-a-uuid",
                "clarifying_question": "q",
                "clarifying_answer": "a",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_reading_rejects_blank_prediction_fields() {
        let state = state();
        let (_, reading) = call(&state, "POST", "/oracle", Some("alice"), Some(reading_request())).await;

        let mut save = reading_request();
        for (key, value) in reading.as_object().unwrap() {
            save[key] = value.clone();
        }
        save["advice"] = serde_json::json!("   ");
        let (status, json) = call(&state, "POST", "/user/readings", Some("alice"), Some(save)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("advice"));

        let (_, list) = call(&state, "GET", "/user/readings", Some("alice"), None).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_sqlite_image_url_is_served() {
        let images = tempfile::tempdir().unwrap();
        let image_dir = images.path().join("3-3").join("1");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join("hexagram.jpg"), b"jpeg-bytes").unwrap();

        let vars: std::collections::HashMap<String, String> = [
            ("ORACLE_STORE", "sqlite"),
            ("OPENAI_API_KEY", "k"),
            ("ORACLE_IMAGE_DIR", images.path().to_str().unwrap()),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config = OracleConfig::from_vars(&vars).unwrap();

        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_image_base_url(&config.image_base_url);
        store
            .insert_content("3-3", "1", "The Creative", "Nine in the second place")
            .unwrap();
        let oracle = Oracle::new(
            Arc::new(store.clone()),
            ReadingGenerator::new(
                Arc::new(StubLlm::with_structured(sample_prediction_json())),
                PromptTemplates::default(),
            ),
        );
        let state = AppState::new(oracle, Arc::new(store), Arc::new(BearerIdentityAuth), config.plans)
            .with_image_dir(config.image_dir.clone().unwrap());

        let (status, json) = call(&state, "POST", "/oracle", Some("u1"), Some(reading_request())).await;
        assert_eq!(status, StatusCode::OK);
        let image_path = json["image_path"].as_str().unwrap();
        assert_eq!(image_path, "http://localhost:8000/images/3-3/1/hexagram.jpg");

        let uri = image_path.trim_start_matches("http://localhost:8000");
        let response = app_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        assert_eq!(&bytes[..], b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_images_not_mounted_without_directory() {
        let (status, _) = call(&state(), "GET", "/images/3-3/1/hexagram.jpg", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
