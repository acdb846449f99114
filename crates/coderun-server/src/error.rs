//! Error types for the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use coderun_core::SandboxError;
use serde_json::json;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The sandbox could not run the submission at all
    #[error("Sandbox unavailable: {0}")]
    Sandbox(#[from] SandboxError),

    /// Listener or connection error while serving
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::MissingField(_) => StatusCode::BAD_REQUEST,
            ServerError::Sandbox(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Io(_) | ServerError::Config(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Sandbox(e) => e.error_type(),
            ServerError::Io(_) => "io_error",
            ServerError::MissingField(_) => "missing_field",
            ServerError::Config(_) => "config_error",
            ServerError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // Launch failures are reported on their own, never as a result
            // that looks like the submitted code ran.
            ServerError::Sandbox(e) => json!({
                "status": "launch_failed",
                "error": e.error_type(),
                "details": e.to_string(),
                "timestamp": chrono::Utc::now()
            }),
            ServerError::MissingField(msg) => json!({
                "error": msg,
                "timestamp": chrono::Utc::now()
            }),
            other => json!({
                "error": other.error_type(),
                "details": other.to_string(),
                "timestamp": chrono::Utc::now()
            }),
        };

        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let unavailable = ServerError::from(SandboxError::EngineUnavailable("down".to_string()));
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(unavailable.error_type(), "engine_unavailable");

        let missing = ServerError::missing_field("code and challenge_id required");
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

        let io = ServerError::from(std::io::Error::other("connection reset"));
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(io.error_type(), "io_error");
    }
}
