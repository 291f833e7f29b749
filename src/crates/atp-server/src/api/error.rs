//! API error types and HTTP response conversion

use atp_core::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Interface-level failures (the §-style execution failures are
/// protocol responses, not HTTP errors; see `models::failed`).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// JSON body for interface errors.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorBody {
            error: self.error_type().to_string(),
            message: self.to_string(),
        };
        tracing::debug!(status = %status, message = %body.message, "api error");
        (status, Json(body)).into_response()
    }
}

/// Whether an engine error is an interface problem (HTTP error) rather
/// than an execution failure (protocol `failed` response).
pub fn as_interface_error(error: &EngineError) -> Option<ApiError> {
    match error {
        EngineError::UnknownExecution(id) => Some(ApiError::NotFound(id.clone())),
        EngineError::InvalidState { id, status } => {
            Some(ApiError::Conflict(format!("execution {} is {}", id, status)))
        }
        EngineError::CodeMismatch(id) => Some(ApiError::Conflict(format!(
            "code does not match execution {}",
            id
        ))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_errors_map_to_http() {
        assert!(matches!(
            as_interface_error(&EngineError::UnknownExecution("x".into())),
            Some(ApiError::NotFound(_))
        ));
        assert!(matches!(
            as_interface_error(&EngineError::CodeMismatch("x".into())),
            Some(ApiError::Conflict(_))
        ));
        assert!(as_interface_error(&EngineError::Cancelled).is_none());
        assert!(as_interface_error(&EngineError::User {
            message: "boom".into(),
            stack: None
        })
        .is_none());
    }
}
