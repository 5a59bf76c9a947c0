use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::protocol::ErrorCode;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Not allowed: {0}")]
    PolicyViolation(String),

    /// A compare-and-swap status transition lost its race; the message is no
    /// longer in a state the operation applies to.
    #[error("Message state changed concurrently")]
    StaleTransition,

    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),
}

impl ServerError {
    /// Wire-level error code carried in `ServerEvent::Error`.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::PolicyViolation(_) | ServerError::StaleTransition => {
                ErrorCode::PolicyViolation
            }
            ServerError::Store(_) => ErrorCode::Persistence,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::PolicyViolation(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::StaleTransition => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Store(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Persistence error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
