use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kestrel_core::CommandError;
use kestrel_runtime::{DispatchError, RuntimeError};

use super::dto::ErrorResponse;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn new(
        status: StatusCode,
        kind: &'static str,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ApiError {
            status,
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// The entity refused the command
    pub fn rejected(err: &CommandError) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "rejected",
            err.code(),
            err.to_string(),
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", "version_conflict", message)
    }

    pub fn unavailable(err: &RuntimeError) -> Self {
        let code = match err {
            RuntimeError::LogUnavailable { .. } => "log_unavailable",
            RuntimeError::CorruptStream { .. } => "corrupt_stream",
            RuntimeError::RecoveryFailed { .. } => "recovery_failed",
            RuntimeError::Unavailable(_) => "entity_unavailable",
            RuntimeError::ShuttingDown => "shutting_down",
        };
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            code,
            err.to_string(),
        )
    }

    /// The call outlived its deadline; it may or may not have taken effect
    pub fn timeout() -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            "timeout",
            "Request timed out; outcome unknown",
        )
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "malformed",
            "malformed_request",
            message,
        )
    }

    pub fn invalid_entity_id(id: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "malformed",
            "invalid_entity_id",
            format!("Invalid entity id '{id}': {reason}"),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "not_found", message)
    }
}

impl From<DispatchError<CommandError>> for ApiError {
    fn from(err: DispatchError<CommandError>) -> Self {
        match err {
            DispatchError::Rejected(e) => ApiError::rejected(&e),
            DispatchError::Conflict { entity_id } => {
                ApiError::conflict(format!("Concurrent modification of {entity_id}"))
            }
            DispatchError::Runtime(e) => ApiError::unavailable(&e),
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        ApiError::unavailable(&err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse::new(self.kind, self.code, self.message));
        (self.status, body).into_response()
    }
}
