//! HTTP mapping for extraction errors.

use assetlens::ExtractError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// An [`ExtractError`] rendered as `{"error": <message>}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub ExtractError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ExtractError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ExtractError::NotFound(_) => StatusCode::NOT_FOUND,
            ExtractError::FetchFailure(_) => StatusCode::BAD_GATEWAY,
            ExtractError::PartialResource { .. }
            | ExtractError::Cache(_)
            | ExtractError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
