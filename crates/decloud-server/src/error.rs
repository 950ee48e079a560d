//! Error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use decloud_core::ValidationResult;
use serde::Serialize;

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Internal server error.
    Internal(String),
    /// Malformed request or unknown migration type.
    BadRequest(String),
    /// No such migration.
    NotFound(String),
    /// The migration is in the wrong state for the request.
    Conflict(String),
    /// Pre-flight validation rejected the request.
    Unprocessable(ValidationResult),
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error flag.
    pub error: bool,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Validation findings, for rejected requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, validation) = match self {
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg, None)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::Unprocessable(result) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_FAILED",
                result.errors.join("; "),
                Some(result),
            ),
        };

        let body = ErrorResponse {
            error: true,
            code: code.to_string(),
            message,
            validation,
        };

        (status, Json(body)).into_response()
    }
}

impl From<decloud_core::Error> for AppError {
    fn from(err: decloud_core::Error) -> Self {
        use decloud_core::Error;

        match err {
            Error::ValidationFailed(result) => AppError::Unprocessable(result),
            Error::UnknownMigrationType(_) | Error::Config(_) | Error::InvalidDefinition(_) => {
                AppError::BadRequest(err.to_string())
            }
            Error::NotFound(_) => AppError::NotFound(err.to_string()),
            Error::StillRunning(_) => AppError::Conflict(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (
                decloud_core::Error::UnknownMigrationType("x".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                decloud_core::Error::NotFound("m-1".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                decloud_core::Error::StillRunning("m-1".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                decloud_core::Error::ValidationFailed(ValidationResult::new().with_error("e")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                decloud_core::Error::execution("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
