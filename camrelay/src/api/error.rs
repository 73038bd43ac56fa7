//! API error handling.
//!
//! Provides consistent error responses for the API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let stage = err.stage();
        let api_err = match &err {
            Error::InvalidDescriptor(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_DESCRIPTOR", err.to_string())
            }
            Error::ToolUnavailable(_) => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "TOOL_UNAVAILABLE", err.to_string())
            }
            Error::ConnectFailed { .. } => {
                ApiError::new(StatusCode::BAD_GATEWAY, "CONNECT_FAILED", err.to_string())
            }
            Error::TimedOut { .. } => {
                ApiError::new(StatusCode::GATEWAY_TIMEOUT, "TIMED_OUT", err.to_string())
            }
            Error::ProcessCrashed { .. } => {
                ApiError::new(StatusCode::BAD_GATEWAY, "PROCESS_CRASHED", err.to_string())
            }
            Error::Stopped { .. } => ApiError::new(StatusCode::CONFLICT, "STOPPED", err.to_string()),
            Error::InvalidPath(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_PATH", err.to_string())
            }
            Error::NotFound(msg) => ApiError::not_found(msg.clone()),
            Error::Configuration(msg) => ApiError::bad_request(msg.clone()),
            Error::IoPath { .. } | Error::Io(_) => {
                tracing::error!("IO error: {}", err);
                ApiError::internal("IO error occurred")
            }
            Error::Other(_) => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        };

        api_err.with_details(serde_json::json!({ "stage": stage }))
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
