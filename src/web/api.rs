use crate::schedule::{ScheduleError, ScheduleHandle};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::upload::{CoordinatesQuery, CoordinatesResponse, CycleOutcome, Sink};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Shared state for the status API
pub struct StatusState {
    pub version: String,
    pub start_time: Instant,
    pub board: StatusBoard,
    pub schedule: ScheduleHandle,
    pub sink: Arc<dyn Sink>,
    pub call_timeout: Duration,
    pub auto_upload: AtomicBool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub auto_upload: bool,
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoUploadRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub lookback_hours: Option<u32>,
    pub min_accuracy: Option<f64>,
    pub max_distance: Option<f64>,
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/status
pub async fn get_status(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        auto_upload: state.auto_upload.load(Ordering::Relaxed),
        snapshot: state.board.snapshot(),
    })
}

/// POST /api/upload
pub async fn trigger_upload(
    State(state): State<Arc<StatusState>>,
) -> Result<Json<CycleOutcome>, ApiError> {
    let outcome = state.schedule.upload_now().await?;
    Ok(Json(outcome))
}

/// PUT /api/auto-upload
pub async fn set_auto_upload(
    State(state): State<Arc<StatusState>>,
    Json(request): Json<AutoUploadRequest>,
) -> Result<Json<AutoUploadRequest>, ApiError> {
    state.schedule.set_auto_upload(request.enabled).await?;
    state.auto_upload.store(request.enabled, Ordering::Relaxed);
    Ok(Json(request))
}

/// GET /api/history?lookback_hours=N&min_accuracy=M&max_distance=D
///
/// Proxies the sink's coordinate history; a failure sets the map-refresh signal.
pub async fn get_history(
    State(state): State<Arc<StatusState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<CoordinatesResponse>, ApiError> {
    if query.lookback_hours == Some(0) {
        return Err(ApiError::BadRequest(
            "lookback_hours must be at least 1".to_string(),
        ));
    }

    let query = CoordinatesQuery {
        lookback_hours: query
            .lookback_hours
            .unwrap_or(CoordinatesQuery::default().lookback_hours),
        min_accuracy: query.min_accuracy,
        max_distance: query.max_distance,
    };

    let result = match tokio::time::timeout(state.call_timeout, state.sink.coordinates(&query)).await
    {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("Timeout waiting for response".to_string()),
    };

    match result {
        Ok(response) => {
            state.board.map_refreshed(Ok(()));
            Ok(Json(response))
        }
        Err(message) => {
            warn!(error = %message, "History query failed");
            state.board.map_refreshed(Err(message.clone()));
            Err(ApiError::BadGateway(message))
        }
    }
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    BadGateway(String),
    Unavailable(String),
    InternalError(String),
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::Closed => ApiError::Unavailable(e.to_string()),
            ScheduleError::Upload(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
