use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Canvas account is not connected")]
    NotConnected,

    #[error("Sync failed: {0}")]
    SyncFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotConnected => (
                StatusCode::BAD_REQUEST,
                "Canvas account is not connected".to_string(),
            ),
            AppError::SyncFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            AppError::Database(e) => {
                error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}
