use super::error::AppError;
use super::AppState;
use crate::bot::broadcast::BroadcastReport;
use crate::bot::format::FeedbackForm;
use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Serve the static model list, read fresh on every request.
///
/// A missing file yields an empty 200 response.
pub async fn models_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match tokio::fs::read(&state.models_path).await {
        Ok(bytes) => {
            debug!("Serving {} bytes from {}", bytes.len(), state.models_path);
            (StatusCode::OK, bytes)
        }
        Err(e) => {
            warn!("Could not read {}: {}", state.models_path, e);
            (StatusCode::OK, Vec::new())
        }
    }
}

#[derive(Serialize)]
pub struct StatsResponse {
    recipients: usize,
    delivered: usize,
    failed: usize,
}

impl From<BroadcastReport> for StatsResponse {
    fn from(report: BroadcastReport) -> Self {
        Self {
            recipients: report.recipients,
            delivered: report.delivered,
            failed: report.failed.len(),
        }
    }
}

/// Accept a feedback submission and broadcast it to every registered user.
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<StatsResponse>, AppError> {
    let form: FeedbackForm =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    let broadcaster = state.broadcaster.as_ref().ok_or(AppError::BotUnavailable)?;
    let report = broadcaster.broadcast(&form).await?;

    Ok(Json(report.into()))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    users: u64,
    bot: bool,
}

/// Liveness plus a count of registered users.
pub async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, AppError> {
    let users = state.store.count_users().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        users,
        bot: state.broadcaster.is_some(),
    }))
}
