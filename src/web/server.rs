use super::api::{
    get_history, get_status, health_check, set_auto_upload, trigger_upload, StatusState,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/upload", post(trigger_upload))
        .route("/api/auto-upload", put(set_auto_upload))
        .route("/api/history", get(get_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status API until `cancel` fires.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<StatusState>,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Status API listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Status API shutting down gracefully");
        })
        .await
}
