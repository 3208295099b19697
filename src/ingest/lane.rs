use super::{BucketStore, PointFilter};
use crate::motion::{DutyCycleConfig, DutyCycleController, MotionType};
use crate::schedule::TimerSet;
use crate::source::{Fix, PositionSource};
use crate::status::StatusBoard;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// Everything that can arrive in the ingestion lane's mailbox.
#[derive(Debug)]
pub enum IngestEvent {
    /// New classification from the motion sensor.
    Motion(MotionType),
    /// New position fix from the position source.
    Fix(Fix),
    /// Debounce timer fired; only the latest generation is honored.
    DebounceElapsed { generation: u64 },
    PermissionRevoked,
    PermissionRestored,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion lane is closed")]
    Closed,
}

/// Counters reported when the lane stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub motions: u64,
    pub fixes: u64,
    pub rejected: u64,
    pub dropped_while_halted: u64,
    pub stored: u64,
    pub storage_errors: u64,
}

/// Sending side of the ingestion lane.
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestEvent>,
}

impl IngestHandle {
    pub async fn send(&self, event: IngestEvent) -> Result<(), IngestError> {
        self.tx.send(event).await.map_err(|_| IngestError::Closed)
    }

    pub async fn motion(&self, motion: MotionType) -> Result<(), IngestError> {
        self.send(IngestEvent::Motion(motion)).await
    }

    pub async fn fix(&self, fix: Fix) -> Result<(), IngestError> {
        self.send(IngestEvent::Fix(fix)).await
    }

    pub async fn permission_revoked(&self) -> Result<(), IngestError> {
        self.send(IngestEvent::PermissionRevoked).await
    }

    pub async fn permission_restored(&self) -> Result<(), IngestError> {
        self.send(IngestEvent::PermissionRestored).await
    }

    /// Ask the lane to stop after the events already queued.
    pub async fn shutdown(&self) -> Result<(), IngestError> {
        self.send(IngestEvent::Shutdown).await
    }
}

/// Serial lane that owns the duty cycle and feeds the bucket store.
///
/// Motion events, fixes and timer firings are handled one at a time in arrival
/// order, so the controller needs no locking. Storage failures are logged and
/// counted; they never stop the lane.
pub struct IngestLane<P> {
    rx: mpsc::Receiver<IngestEvent>,
    controller: DutyCycleController<P>,
    filter: PointFilter,
    buckets: Arc<BucketStore>,
    stats: LaneStats,
}

impl<P: PositionSource + 'static> IngestLane<P> {
    pub fn new(
        config: DutyCycleConfig,
        filter: PointFilter,
        source: P,
        buckets: Arc<BucketStore>,
        board: StatusBoard,
        capacity: usize,
    ) -> (Self, IngestHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let controller = DutyCycleController::new(config, source, TimerSet::new(tx.clone()), board);
        let lane = Self {
            rx,
            controller,
            filter,
            buckets,
            stats: LaneStats::default(),
        };
        (lane, IngestHandle { tx })
    }

    pub fn spawn(self) -> JoinHandle<LaneStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> LaneStats {
        self.controller.start();
        info!(
            max_horizontal_accuracy = self.filter.max_horizontal_accuracy(),
            bucket_width_secs = self.buckets.width().as_secs(),
            "Ingestion lane started"
        );

        while let Some(event) = self.rx.recv().await {
            match event {
                IngestEvent::Motion(motion) => {
                    self.stats.motions += 1;
                    self.controller.on_motion(motion);
                }
                IngestEvent::Fix(fix) => self.on_fix(fix).await,
                IngestEvent::DebounceElapsed { generation } => {
                    self.controller.on_debounce_elapsed(generation)
                }
                IngestEvent::PermissionRevoked => self.controller.on_permission_revoked(),
                IngestEvent::PermissionRestored => self.controller.on_permission_restored(),
                IngestEvent::Shutdown => {
                    debug!("Ingestion lane received shutdown");
                    break;
                }
            }
        }

        self.controller.shutdown();
        info!(
            fixes = self.stats.fixes,
            stored = self.stats.stored,
            rejected = self.stats.rejected,
            storage_errors = self.stats.storage_errors,
            "Ingestion lane shutdown complete"
        );
        self.stats
    }

    async fn on_fix(&mut self, fix: Fix) {
        self.stats.fixes += 1;

        if !self.controller.is_sampling() {
            self.stats.dropped_while_halted += 1;
            trace!(timestamp = %fix.timestamp, "Dropping fix while sampling is halted");
            return;
        }

        let Some(point) = self.filter.admit(&fix, self.controller.motion()) else {
            self.stats.rejected += 1;
            debug!(
                timestamp = %fix.timestamp,
                accuracy = fix.horizontal_accuracy,
                "Fix rejected by accuracy filter"
            );
            return;
        };

        match self.buckets.assign(point).await {
            Ok(stored) => {
                self.stats.stored += 1;
                trace!(bucket_id = %stored.bucket_id, seq = stored.seq, "Point stored");
            }
            Err(e) => {
                self.stats.storage_errors += 1;
                error!(error = %e, timestamp = %fix.timestamp, "Failed to store point");
            }
        }
    }
}
