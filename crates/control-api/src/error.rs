use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use engine_runtime::error::{CancelError, LookupError, StartError};
use model::core::identifiers::OperationId;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Sync operation {operation_id} is already running")]
    Conflict { operation_id: OperationId },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Internal server error")]
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ApiError::Conflict { operation_id } => (
                StatusCode::CONFLICT,
                json!({ "error": self.to_string(), "operationId": operation_id }),
            ),
            ApiError::NotFound { message } => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Internal { message } => {
                error!(error = %message, "Control API request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": self.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<StartError> for ApiError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::AlreadyRunning { operation_id } => ApiError::Conflict { operation_id },
            StartError::InvalidRequest(message) => ApiError::BadRequest { message },
            other => ApiError::Internal {
                message: other.to_string(),
            },
        }
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        ApiError::NotFound {
            message: err.to_string(),
        }
    }
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound(_) => ApiError::NotFound {
                message: err.to_string(),
            },
            LookupError::State(_) => ApiError::Internal {
                message: err.to_string(),
            },
        }
    }
}
