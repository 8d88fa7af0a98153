//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::jockey::JockeyError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Gateway error: {0}")]
    BadGateway(String),

    /// Upstream answered with an error status; relayed as-is.
    #[error("Upstream error: {status}")]
    Upstream { status: StatusCode, body: String },
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Upstream { status, .. } => *status,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::BadGateway(_) => "BAD_GATEWAY",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }
}

/// Structured error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        // Log errors appropriately
        match &self {
            ApiError::Internal(msg) | ApiError::BadGateway(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "Service unavailable");
            }
            ApiError::Upstream { status, body } => {
                warn!(error_code = code, status = %status, body = %body, "Upstream error");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "Client error");
            }
        }

        let details = match self {
            ApiError::Upstream { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        };
        let body = ErrorResponse {
            error: message,
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<JockeyError> for ApiError {
    fn from(err: JockeyError) -> Self {
        match err {
            JockeyError::Status { status, body } => ApiError::Upstream {
                status: StatusCode::from_u16(status.as_u16())
                    .unwrap_or(StatusCode::BAD_GATEWAY),
                body,
            },
            err @ (JockeyError::NoAssistant(_) | JockeyError::StaticUrlMissing) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            err if err.is_transient() => ApiError::ServiceUnavailable(err.to_string()),
            err => ApiError::BadGateway(err.to_string()),
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_status_codes() {
        assert_eq!(ApiError::not_found("").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::bad_request("").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::ServiceUnavailable(String::new()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::internal("").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::BadGateway(String::new()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_status_is_relayed() {
        let err = ApiError::from(JockeyError::Status {
            status: reqwest::StatusCode::NOT_FOUND,
            body: "no such file".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "UPSTREAM_ERROR");
    }

    #[test]
    fn test_missing_static_url_is_unavailable() {
        let err = ApiError::from(JockeyError::StaticUrlMissing);
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));

        let err = ApiError::from(JockeyError::ParseError("bad".to_string()));
        assert!(matches!(err, ApiError::BadGateway(_)));
    }
}
