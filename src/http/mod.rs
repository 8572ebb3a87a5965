//! HTTP surface: the static model list, feedback submission and health.

mod error;
mod routes;

pub use error::AppError;

use crate::bot::broadcast::Broadcaster;
use crate::storage::UserStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared by all HTTP handlers
pub struct AppState {
    /// User roster, read by the health check
    pub store: Arc<dyn UserStore>,
    /// Feedback broadcaster, absent when no bot token is configured
    pub broadcaster: Option<Broadcaster>,
    /// File served on `/models`
    pub models_path: String,
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/models", get(routes::models_handler))
        .route("/stats", post(routes::stats_handler))
        // Path used by the mobile client
        .route("/feedback", post(routes::stats_handler))
        .route("/health", get(routes::health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an I/O error if the address cannot be bound or serving fails.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
