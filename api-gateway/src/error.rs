//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use spendgate_common::SpendgateError;
use tracing::error;

/// Error returned from handlers
#[derive(Debug)]
pub struct ApiError(pub SpendgateError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SpendgateError::Validation(_) => StatusCode::BAD_REQUEST,
            SpendgateError::Authentication(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match &self.0 {
            SpendgateError::Validation(_) => "invalid_request",
            SpendgateError::Authentication(_) => "unauthorized",
            _ => "internal_error",
        }
    }
}

impl From<SpendgateError> for ApiError {
    fn from(err: SpendgateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_client_error() {
            self.0.to_string()
        } else {
            error!(error = %self.0, "Request failed");
            "internal error".to_string()
        };

        (status, Json(json!({"error": self.code(), "message": message}))).into_response()
    }
}
