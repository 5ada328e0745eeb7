//! JSON error responses for the REST, broker and websocket routes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetrelay_core::Error as CoreError;
use serde::Serialize;
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

/// A status and a message that is safe to show the caller.
/// Storage and internal failures are logged and reported as a bare 500.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    status: u16,
}

impl AppError {
    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::FORBIDDEN, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            status: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            // a lost race and an illegal move look the same to the caller
            CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoreError::Database(_) | CoreError::Redis(_) | CoreError::Serialization(_) | CoreError::Internal(_) => {
                error!(error = %err, "Request failed");
                return Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
            }
        };

        let message = match err {
            CoreError::NotFound(msg)
            | CoreError::Authentication(msg)
            | CoreError::Authorization(msg)
            | CoreError::InvalidInput(msg) => msg,
            other => other.to_string(),
        };
        Self::with_status(status, message)
    }
}
