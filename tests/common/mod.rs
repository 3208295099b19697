//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracklog::ingest::BucketStore;
use tracklog::motion::MotionType;
use tracklog::source::Fix;
use tracklog::status::StatusBoard;
use tracklog::storage::{DuckDbStore, Point, Store};
use tracklog::upload::{
    CoordinateRow, CoordinatesQuery, CoordinatesResponse, Sink, SinkError, SinkStatus,
    UploadBatch,
};

/// 2026-01-28 at the given UTC wall time.
pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 28, hour, minute, second).unwrap()
}

pub fn fix(timestamp: DateTime<Utc>, accuracy: f64) -> Fix {
    Fix {
        timestamp,
        latitude: 37.7749,
        longitude: -122.4194,
        altitude: 16.0,
        speed: 1.4,
        horizontal_accuracy: accuracy,
        vertical_accuracy: 4.0,
    }
}

pub fn point(timestamp: DateTime<Utc>) -> Point {
    Point::from_fix(&fix(timestamp, 10.0), MotionType::Walking)
}

pub async fn memory_store() -> Arc<DuckDbStore> {
    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    store.init_schema().await.unwrap();
    store
}

pub fn bucket_store(store: &Arc<DuckDbStore>, board: &StatusBoard) -> Arc<BucketStore> {
    Arc::new(BucketStore::new(
        store.clone(),
        Duration::from_secs(60),
        board.clone(),
    ))
}

/// In-process sink answering uploads from a script; anything past the
/// script is accepted.
#[derive(Default)]
pub struct FakeSink {
    script: Mutex<VecDeque<Result<(), u16>>>,
    pub batches: Mutex<Vec<UploadBatch>>,
    pub heartbeats: AtomicUsize,
    pub coordinate_queries: Mutex<Vec<CoordinatesQuery>>,
    pub coordinates_fail: bool,
}

impl FakeSink {
    pub fn new(script: Vec<Result<(), u16>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn failing_history() -> Self {
        Self {
            coordinates_fail: true,
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FakeSink {
    async fn upload(&self, batch: &UploadBatch) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(batch.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Err(status)) => Err(SinkError::Status {
                status,
                message: "scripted failure".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn heartbeat(&self) -> Result<(), SinkError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<SinkStatus, SinkError> {
        Ok(SinkStatus {
            status: "ok".to_string(),
        })
    }

    async fn coordinates(
        &self,
        query: &CoordinatesQuery,
    ) -> Result<CoordinatesResponse, SinkError> {
        self.coordinate_queries.lock().unwrap().push(query.clone());
        if self.coordinates_fail {
            return Err(SinkError::Status {
                status: 500,
                message: "history unavailable".to_string(),
            });
        }
        Ok(CoordinatesResponse {
            status: "ok".to_string(),
            count: 1,
            lookback_hours: query.lookback_hours,
            coordinates: vec![CoordinateRow(
                "2026-01-28T10:00:15Z".to_string(),
                37.7749,
                -122.4194,
                10.0,
            )],
        })
    }
}

/// What the HTTP mock sink has seen.
#[derive(Default)]
pub struct MockSinkState {
    dump_statuses: Mutex<VecDeque<u16>>,
    pub dumps: Mutex<Vec<Value>>,
    pub heartbeat_bodies: Mutex<Vec<Bytes>>,
    pub coordinate_queries: Mutex<Vec<HashMap<String, String>>>,
}

impl MockSinkState {
    pub fn dumps(&self) -> Vec<Value> {
        self.dumps.lock().unwrap().clone()
    }
}

pub struct MockSink {
    pub url: String,
    pub state: Arc<MockSinkState>,
}

/// Serve the sink's HTTP API on an ephemeral port. `/dump` answers with the
/// given statuses in order, then 200.
pub async fn spawn_mock_sink(dump_statuses: &[u16]) -> MockSink {
    let state = Arc::new(MockSinkState {
        dump_statuses: Mutex::new(dump_statuses.iter().copied().collect()),
        ..Default::default()
    });

    let app = Router::new()
        .route("/dump", post(dump))
        .route("/heartbeat", post(heartbeat))
        .route("/status", get(status))
        .route("/coordinates", get(coordinates))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockSink {
        url: format!("http://{}", addr),
        state,
    }
}

async fn dump(State(state): State<Arc<MockSinkState>>, body: Bytes) -> (StatusCode, Json<Value>) {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.dumps.lock().unwrap().push(payload);

    let status = state.dump_statuses.lock().unwrap().pop_front().unwrap_or(200);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "result": "ok" })))
}

async fn heartbeat(State(state): State<Arc<MockSinkState>>, body: Bytes) -> StatusCode {
    state.heartbeat_bodies.lock().unwrap().push(body);
    StatusCode::OK
}

async fn status() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn coordinates(
    State(state): State<Arc<MockSinkState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let lookback: u32 = query
        .get("lookback_hours")
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);
    state.coordinate_queries.lock().unwrap().push(query);

    Json(json!({
        "status": "ok",
        "count": 2,
        "lookback_hours": lookback,
        "coordinates": [
            ["2026-01-28T10:00:15Z", 37.7749, -122.4194, 10.0],
            ["2026-01-28T10:00:45Z", 37.7751, -122.4190, 12.5]
        ]
    }))
}
