//! HTTP rendering of [`OracleError`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::utilities::errors::OracleError;

impl OracleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OracleError::NotFound(_) => StatusCode::NOT_FOUND,
            OracleError::Generation(_) | OracleError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            OracleError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OracleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OracleError::Conflict(_) => StatusCode::CONFLICT,
            OracleError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for OracleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(%status, "{}", self);
        } else {
            tracing::warn!(%status, "{}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
