use super::sink::{Sink, SinkError};
use super::wire::{UploadBatch, WireError};
use crate::status::StatusBoard;
use crate::storage::{Bucket, Store, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Failure of one upload attempt.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport failure: {0}")]
    Transport(#[from] SinkError),

    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] WireError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The sink accepted the batch but the bucket could not be completed.
    #[error("delivered but not committed: {0}")]
    Uncommitted(StorageError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub visited: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub points_uploaded: u64,
    /// Last error seen in the cycle, if any bucket failed.
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// No queued buckets.
    NothingToUpload,
    /// Another cycle holds the lock.
    AlreadyRunning,
    Finished(CycleReport),
}

/// Delivers queued buckets to the sink, oldest first, one at a time.
///
/// The current bucket is never selected; its start is read from the watch
/// channel the bucket store publishes. Only one cycle runs at a time.
pub struct UploadCoordinator {
    store: Arc<dyn Store>,
    sink: Arc<dyn Sink>,
    current: watch::Receiver<Option<DateTime<Utc>>>,
    board: StatusBoard,
    call_timeout: Duration,
    cycle: Mutex<()>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        sink: Arc<dyn Sink>,
        current: watch::Receiver<Option<DateTime<Utc>>>,
        board: StatusBoard,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            current,
            board,
            call_timeout,
            cycle: Mutex::new(()),
        }
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Buckets a cycle started now would visit, in visiting order.
    pub async fn queued_buckets(&self) -> Result<Vec<Bucket>, StorageError> {
        let current = *self.current.borrow();
        self.store.uploadable_buckets(current).await
    }

    pub async fn run_upload_cycle(&self) -> Result<CycleOutcome, UploadError> {
        let Ok(_guard) = self.cycle.try_lock() else {
            debug!("Upload cycle already in progress");
            return Ok(CycleOutcome::AlreadyRunning);
        };

        let queued = self.queued_buckets().await?;
        self.board.set_queued_buckets(queued.len() as u64);
        if queued.is_empty() {
            debug!("No buckets queued for upload");
            return Ok(CycleOutcome::NothingToUpload);
        }

        info!(buckets = queued.len(), "Starting upload cycle");
        let mut report = CycleReport::default();

        for bucket in &queued {
            report.visited += 1;
            match self.upload_bucket(bucket).await {
                Ok(points) => {
                    report.uploaded += 1;
                    report.points_uploaded += points;
                }
                Err(e) => {
                    report.failed += 1;
                    report.last_error = Some(e.to_string());
                    self.record_failure(bucket, &e).await;
                }
            }
        }

        info!(
            visited = report.visited,
            uploaded = report.uploaded,
            failed = report.failed,
            points = report.points_uploaded,
            "Upload cycle finished"
        );
        Ok(CycleOutcome::Finished(report))
    }

    /// Select, send and commit one bucket. Returns the number of points purged.
    async fn upload_bucket(&self, bucket: &Bucket) -> Result<u64, UploadError> {
        let attempted_at = Utc::now();
        self.board.upload_attempted(attempted_at);

        let points = self.store.bucket_points(bucket.id).await?;
        let Some(through_seq) = points.last().map(|p| p.seq) else {
            debug!(bucket = %bucket.name, "Bucket emptied before upload, skipping");
            return Ok(0);
        };

        let batch = UploadBatch::from_points(&points)?;
        debug!(
            bucket = %bucket.name,
            bucket_id = %bucket.id,
            points = batch.len(),
            retry_count = bucket.retry_count,
            "Uploading bucket"
        );

        match tokio::time::timeout(self.call_timeout, self.sink.upload(&batch)).await {
            Ok(result) => result?,
            Err(_) => return Err(SinkError::Timeout.into()),
        }

        let completion = self
            .store
            .complete_bucket(bucket.id, through_seq, Utc::now())
            .await
            .map_err(|e| {
                // The points go out again next cycle
                error!(bucket = %bucket.name, error = %e, "Failed to commit uploaded bucket");
                UploadError::Uncommitted(e)
            })?;

        self.board
            .bucket_uploaded(bucket.id, completion.purged, completion.completed);
        info!(
            bucket = %bucket.name,
            points = completion.purged,
            completed = completion.completed,
            "Bucket uploaded"
        );
        Ok(completion.purged)
    }

    async fn record_failure(&self, bucket: &Bucket, error: &UploadError) {
        // The send itself succeeded, so the bucket keeps its retry state
        let counts_as_attempt = !matches!(error, UploadError::Uncommitted(_));
        warn!(
            bucket = %bucket.name,
            bucket_id = %bucket.id,
            retry_count = bucket.retry_count + u32::from(counts_as_attempt),
            error = %error,
            "Bucket upload failed"
        );

        if counts_as_attempt {
            if let Err(e) = self.store.record_failed_attempt(bucket.id, Utc::now()).await {
                error!(bucket = %bucket.name, error = %e, "Failed to record upload attempt");
            }
        }
        self.board.upload_failed(Some(bucket.id), error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::BucketStore;
    use crate::motion::MotionType;
    use crate::storage::flaky::FlakyStore;
    use crate::storage::{BucketStatus, DuckDbStore, Point};
    use crate::upload::wire::{CoordinatesQuery, CoordinatesResponse, SinkStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;

    /// Sink that answers from a script and records what it was sent.
    #[derive(Default)]
    struct ScriptedSink {
        responses: std::sync::Mutex<VecDeque<Result<(), u16>>>,
        received: std::sync::Mutex<Vec<UploadBatch>>,
        stall: bool,
    }

    impl ScriptedSink {
        fn new(responses: impl IntoIterator<Item = Result<(), u16>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into_iter().collect()),
                ..Default::default()
            }
        }

        fn received(&self) -> Vec<UploadBatch> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for ScriptedSink {
        async fn upload(&self, batch: &UploadBatch) -> Result<(), SinkError> {
            if self.stall {
                std::future::pending::<()>().await;
            }
            self.received.lock().unwrap().push(batch.clone());
            match self.responses.lock().unwrap().pop_front().unwrap_or(Ok(())) {
                Ok(()) => Ok(()),
                Err(status) => Err(SinkError::Status {
                    status,
                    message: "scripted".to_string(),
                }),
            }
        }

        async fn heartbeat(&self) -> Result<(), SinkError> {
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
            Ok(CoordinatesResponse {
                status: "ok".to_string(),
                count: 0,
                lookback_hours: query.lookback_hours,
                coordinates: Vec::new(),
            })
        }
    }

    fn point(minute: u32, second: u32) -> Point {
        Point {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 28, 10, minute, second).unwrap(),
            latitude: 52.52,
            longitude: 13.405,
            altitude: 34.0,
            speed: 1.1,
            horizontal_accuracy: 9.0,
            vertical_accuracy: 3.0,
            motion: MotionType::Walking,
        }
    }

    struct Fixture {
        store: Arc<DuckDbStore>,
        buckets: BucketStore,
        board: StatusBoard,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(DuckDbStore::in_memory().unwrap());
        store.init_schema().await.unwrap();
        let board = StatusBoard::new();
        let buckets = BucketStore::new(store.clone(), Duration::from_secs(60), board.clone());
        Fixture {
            store,
            buckets,
            board,
        }
    }

    fn coordinator(f: &Fixture, sink: Arc<dyn Sink>) -> UploadCoordinator {
        UploadCoordinator::new(
            f.store.clone(),
            sink,
            f.buckets.watch_current(),
            f.board.clone(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_nothing_to_upload_when_only_current_bucket() {
        let f = fixture().await;
        f.buckets.assign(point(0, 10)).await.unwrap();

        let sink = Arc::new(ScriptedSink::default());
        let coordinator = coordinator(&f, sink.clone());

        assert_eq!(
            coordinator.run_upload_cycle().await.unwrap(),
            CycleOutcome::NothingToUpload
        );
        assert!(sink.received().is_empty());
    }

    #[tokio::test]
    async fn test_success_completes_and_purges() {
        let f = fixture().await;
        f.buckets.assign(point(0, 10)).await.unwrap();
        f.buckets.assign(point(0, 40)).await.unwrap();
        f.buckets.assign(point(1, 5)).await.unwrap();

        let sink = Arc::new(ScriptedSink::default());
        let coordinator = coordinator(&f, sink.clone());

        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.points_uploaded, 2);
        assert!(report.last_error.is_none());

        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].locations.len(), 2);

        let all = f.store.list_buckets().await.unwrap();
        let first = all.iter().find(|b| b.point_count == 0).unwrap();
        assert_eq!(first.status, BucketStatus::Completed);

        let snapshot = f.board.snapshot();
        assert_eq!(snapshot.buffered_points, 1);
        assert_eq!(snapshot.queued_buckets, 0);
        assert!(snapshot.last_upload_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_points_and_continues() {
        let f = fixture().await;
        f.buckets.assign(point(0, 10)).await.unwrap();
        f.buckets.assign(point(1, 10)).await.unwrap();
        f.buckets.assign(point(2, 10)).await.unwrap();

        let sink = Arc::new(ScriptedSink::new([Err(500), Ok(())]));
        let coordinator = coordinator(&f, sink.clone());

        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.visited, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert!(report.last_error.unwrap().contains("500"));

        // Oldest first
        let received = sink.received();
        assert_eq!(
            received[0].locations[0].properties.timestamp,
            "2026-01-28T10:00:10Z"
        );
        assert_eq!(
            received[1].locations[0].properties.timestamp,
            "2026-01-28T10:01:10Z"
        );

        let all = f.store.list_buckets().await.unwrap();
        let failed = all
            .iter()
            .find(|b| b.start == Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap())
            .unwrap();
        assert_eq!(failed.status, BucketStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.point_count, 1);
        assert!(failed.last_attempt.is_some());
        assert!(f.board.snapshot().last_upload_error.is_some());

        // Retried on the next cycle with no ceiling
        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.uploaded, 1);
        assert!(f.board.snapshot().last_upload_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_times_out() {
        let f = fixture().await;
        f.buckets.assign(point(0, 10)).await.unwrap();
        f.buckets.assign(point(1, 10)).await.unwrap();

        let sink = Arc::new(ScriptedSink {
            stall: true,
            ..Default::default()
        });
        let coordinator = coordinator(&f, sink);

        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.failed, 1);
        assert!(report.last_error.unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_concurrent_cycle_reports_already_running() {
        let f = fixture().await;
        let sink = Arc::new(ScriptedSink::default());
        let coordinator = coordinator(&f, sink);

        let _held = coordinator.cycle.lock().await;
        assert_eq!(
            coordinator.run_upload_cycle().await.unwrap(),
            CycleOutcome::AlreadyRunning
        );
    }

    #[tokio::test]
    async fn test_unencodable_bucket_stays_pending_and_cycle_continues() {
        let f = fixture().await;
        let mut bad = point(0, 10);
        bad.altitude = f64::NAN;
        f.buckets.assign(bad).await.unwrap();
        f.buckets.assign(point(1, 10)).await.unwrap();
        f.buckets.assign(point(2, 10)).await.unwrap();

        let sink = Arc::new(ScriptedSink::default());
        let coordinator = coordinator(&f, sink.clone());

        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.visited, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert!(report.last_error.unwrap().contains("non-finite altitude"));

        // Only the good bucket reached the sink
        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0].locations[0].properties.timestamp,
            "2026-01-28T10:01:10Z"
        );

        let all = f.store.list_buckets().await.unwrap();
        let unencodable = &all[0];
        assert_eq!(unencodable.status, BucketStatus::Pending);
        assert_eq!(unencodable.retry_count, 1);
        assert_eq!(unencodable.point_count, 1);
        assert!(f.board.snapshot().last_upload_error.is_some());
    }

    #[tokio::test]
    async fn test_commit_failure_after_delivery_keeps_retry_state() {
        let store = Arc::new(FlakyStore::new().await);
        let board = StatusBoard::new();
        let buckets = BucketStore::new(store.clone(), Duration::from_secs(60), board.clone());
        buckets.assign(point(0, 10)).await.unwrap();
        buckets.assign(point(1, 10)).await.unwrap();

        let sink = Arc::new(ScriptedSink::default());
        let coordinator = UploadCoordinator::new(
            store.clone(),
            sink.clone(),
            buckets.watch_current(),
            board.clone(),
            Duration::from_secs(30),
        );

        store.fail_complete.store(true, Ordering::SeqCst);
        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.failed, 1);
        assert!(report.last_error.unwrap().contains("not committed"));
        assert!(board.snapshot().last_upload_error.is_some());

        let all = store.list_buckets().await.unwrap();
        assert_eq!(all[0].status, BucketStatus::Pending);
        assert_eq!(all[0].retry_count, 0);
        assert!(all[0].last_attempt.is_none());
        assert_eq!(all[0].point_count, 1);

        // The same points are delivered again once the store recovers
        store.fail_complete.store(false, Ordering::SeqCst);
        let CycleOutcome::Finished(report) = coordinator.run_upload_cycle().await.unwrap() else {
            panic!("expected a finished cycle");
        };
        assert_eq!(report.uploaded, 1);
        assert_eq!(sink.received().len(), 2);
        assert_eq!(sink.received()[0], sink.received()[1]);
        let all = store.list_buckets().await.unwrap();
        assert_eq!(all[0].status, BucketStatus::Completed);
        assert_eq!(all[0].point_count, 0);
    }
}
