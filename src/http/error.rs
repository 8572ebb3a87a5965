use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    /// The request body could not be read or decoded
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No bot token is configured, so nothing can be broadcast
    #[error("Bot is not configured")]
    BotUnavailable,

    /// The user store failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::BotUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        (status, self.to_string()).into_response()
    }
}
