use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::ingest::{BucketStore, IngestHandle, IngestLane, PointFilter};
use crate::motion::DutyCycleConfig;
use crate::schedule::ScheduleDriver;
use crate::source::{ReplayPositionSource, ReplayReader};
use crate::status::{StatusBoard, StatusEvent};
use crate::storage::{DuckDbStore, Store};
use crate::upload::{HttpSink, Sink, UploadCoordinator};
use crate::web::{run_server, StatusState};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("sink error: {0}")]
    Sink(#[from] crate::upload::SinkError),

    #[error("status API error: {0}")]
    StatusApi(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything a running tracker needs, built once and shared by `Arc`.
pub struct Services {
    pub board: StatusBoard,
    pub store: Arc<dyn Store>,
    pub buckets: Arc<BucketStore>,
    pub sink: Arc<dyn Sink>,
    pub coordinator: Arc<UploadCoordinator>,
}

impl Services {
    pub async fn open(config: &Config) -> Result<Self, RunError> {
        info!(path = %config.storage.path.display(), "Initializing storage");
        let store: Arc<dyn Store> = Arc::new(DuckDbStore::open(&config.storage.path)?);
        store.init_schema().await?;

        let board = StatusBoard::new();
        let buckets = Arc::new(BucketStore::new(
            store.clone(),
            config.buckets.window,
            board.clone(),
        ));
        buckets.restore().await?;

        let sink: Arc<dyn Sink> = Arc::new(HttpSink::new(&config.sink)?);
        let coordinator = Arc::new(UploadCoordinator::new(
            store.clone(),
            sink.clone(),
            buckets.watch_current(),
            board.clone(),
            config.sink.timeout,
        ));

        Ok(Self {
            board,
            store,
            buckets,
            sink,
            coordinator,
        })
    }
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_tracker(&config_path).await.map_err(|e| e.into())
}

/// Exit with a hint when no config file was found.
pub(crate) fn require_config_path(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/tracklog/config.yml");
            eprintln!("  /etc/tracklog/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'tracklog config init' to generate one.");
            std::process::exit(1);
        }
    }
}

async fn run_tracker(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let services = Services::open(&config).await?;
    let cancel = CancellationToken::new();

    let log_task = spawn_event_logger(services.board.subscribe(), cancel.clone());

    // Ingestion lane
    let source = ReplayPositionSource::new();
    let (lane, ingest) = IngestLane::new(
        DutyCycleConfig::from(&config.sampling),
        PointFilter::new(config.sampling.max_horizontal_accuracy),
        source.clone(),
        services.buckets.clone(),
        services.board.clone(),
        config.sampling.mailbox_capacity,
    );
    let lane_task = lane.spawn();

    // Upload lane
    let (driver, schedule) =
        ScheduleDriver::new(services.coordinator.clone(), config.schedule.clone());
    let driver_task = driver.spawn(cancel.clone());

    let web_task = match &config.status {
        Some(status) => {
            let listener = tokio::net::TcpListener::bind(&status.listen).await?;
            let state = Arc::new(StatusState {
                version: env!("CARGO_PKG_VERSION").to_string(),
                start_time: Instant::now(),
                board: services.board.clone(),
                schedule: schedule.clone(),
                sink: services.sink.clone(),
                call_timeout: config.sink.timeout,
                auto_upload: AtomicBool::new(config.schedule.auto_upload_at_midnight),
            });
            Some(tokio::spawn(run_server(listener, state, cancel.clone())))
        }
        None => None,
    };

    let replay_task = config.replay.as_ref().map(|replay| {
        let reader = ReplayReader::new(replay, source.clone());
        tokio::spawn(reader.run(ingest.clone(), cancel.clone()))
    });

    info!("Tracker started, press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    cancel.cancel();
    shutdown(ingest, lane_task, driver_task, web_task, replay_task).await;
    let _ = log_task.await;

    info!("Tracker shutdown complete");
    Ok(())
}

async fn shutdown(
    ingest: IngestHandle,
    lane_task: JoinHandle<crate::ingest::LaneStats>,
    driver_task: JoinHandle<()>,
    web_task: Option<JoinHandle<Result<(), std::io::Error>>>,
    replay_task: Option<JoinHandle<Result<crate::source::ReplayStats, crate::source::ReplayError>>>,
) {
    if let Some(task) = replay_task {
        match task.await {
            Ok(Ok(stats)) => debug!(?stats, "Replay stopped"),
            Ok(Err(e)) => warn!(error = %e, "Replay ended with error"),
            Err(e) => error!(error = %e, "Replay task failed"),
        }
    }

    if ingest.shutdown().await.is_err() {
        warn!("Ingestion lane already stopped");
    }
    match lane_task.await {
        Ok(stats) => info!(stored = stats.stored, rejected = stats.rejected, "Ingestion lane stopped"),
        Err(e) => error!(error = %e, "Ingestion lane task failed"),
    }

    if let Err(e) = driver_task.await {
        error!(error = %e, "Schedule driver task failed");
    }

    if let Some(task) = web_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Status API error"),
            Err(e) => error!(error = %e, "Status API task failed"),
        }
    }
}

/// Mirror board events into the log.
fn spawn_event_logger(
    mut events: broadcast::Receiver<StatusEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(StatusEvent::UploadFailed { bucket_id, error }) => {
                    debug!(?bucket_id, error = %error, "Upload error signal raised")
                }
                Ok(StatusEvent::SamplingHalted) => warn!("Sampling halted"),
                Ok(StatusEvent::SamplingResumed) => info!("Sampling resumed"),
                Ok(StatusEvent::MapRefreshFailed { error }) => {
                    debug!(error = %error, "Map refresh signal raised")
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Status event logger lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
