//! Error responses for the API.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use vexora_devices::CommandError;

/// API error with its HTTP status.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    pub message: String,
    #[serde(skip)]
    pub status: StatusCode,
}

pub type ApiResult<T> = Result<T, ErrorResponse>;

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Bad request (400).
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message, StatusCode::BAD_REQUEST)
    }

    /// Not found (404).
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message, StatusCode::NOT_FOUND)
    }

    /// Internal server error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Bad gateway (502): the device side failed us.
    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, StatusCode::BAD_GATEWAY)
    }

    /// Service unavailable (503).
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message, StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

/// Timeouts are not errors at the HTTP layer and are handled by the caller.
impl From<CommandError> for ErrorResponse {
    fn from(err: CommandError) -> Self {
        let message = err.to_string();
        match err {
            CommandError::InvalidRequest(_) => Self::bad_request(message),
            CommandError::NotConnected => Self::service_unavailable(message),
            CommandError::PublishFailed(_) => Self::bad_gateway("PUBLISH_FAILED", message),
            CommandError::InvalidAcknowledgement => Self::bad_gateway("INVALID_ACK", message),
            CommandError::Timeout { .. } => {
                Self::new("TIMEOUT", message, StatusCode::GATEWAY_TIMEOUT)
            }
            CommandError::Cancelled | CommandError::Encode(_) => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_status() {
        assert_eq!(
            ErrorResponse::from(CommandError::NotConnected).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorResponse::from(CommandError::PublishFailed("x".into())).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ErrorResponse::from(CommandError::InvalidRequest("x".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorResponse::from(CommandError::Cancelled).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
