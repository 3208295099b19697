use crate::status::StatusBoard;
use crate::storage::{Bucket, BucketWindow, Point, Store, StorageError, StoredPoint};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Assigns points to fixed-width time buckets and tracks the current bucket.
///
/// All appends go through one async mutex, so the lookup-or-create of a new
/// window is a single-writer critical section even when `assign` is called
/// from several tasks. The start of the current bucket is published on a watch
/// channel for the upload lane, which must never touch it.
pub struct BucketStore {
    store: Arc<dyn Store>,
    width: Duration,
    current: Mutex<Option<Bucket>>,
    current_start: watch::Sender<Option<DateTime<Utc>>>,
    board: StatusBoard,
}

impl BucketStore {
    pub fn new(store: Arc<dyn Store>, width: Duration, board: StatusBoard) -> Self {
        let (current_start, _) = watch::channel(None);
        Self {
            store,
            width,
            current: Mutex::new(None),
            current_start,
            board,
        }
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    pub fn window_for(&self, timestamp: DateTime<Utc>) -> BucketWindow {
        BucketWindow::containing(timestamp, self.width)
    }

    /// Start of the current bucket, updated whenever appends move to a new window.
    pub fn watch_current(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.current_start.subscribe()
    }

    pub async fn current(&self) -> Option<Bucket> {
        self.current.lock().await.clone()
    }

    /// Recompute the observable counters from what is already persisted.
    pub async fn restore(&self) -> Result<(), StorageError> {
        let current = *self.current_start.borrow();
        let buffered = self.store.buffered_point_count().await?;
        let queued = self.store.uploadable_buckets(current).await?.len() as u64;
        self.board.set_counters(buffered, queued);

        info!(buffered_points = buffered, queued_buckets = queued, "Restored buffer state");
        Ok(())
    }

    /// Persist a point into the bucket whose window contains it.
    pub async fn assign(&self, point: Point) -> Result<StoredPoint, StorageError> {
        let window = self.window_for(point.timestamp);
        let mut current = self.current.lock().await;

        let (bucket, switched) = match current.as_ref() {
            Some(bucket) if bucket.start == window.start => (bucket.clone(), false),
            // Late point for an older window: file it there, the current bucket stays
            Some(bucket) if window.start < bucket.start => {
                (self.store.lookup_or_create_bucket(&window).await?, false)
            }
            _ => (self.store.lookup_or_create_bucket(&window).await?, true),
        };

        if switched {
            debug!(
                bucket = %bucket.name,
                bucket_id = %bucket.id,
                existing_points = bucket.point_count,
                "Switching current bucket"
            );
            // The resolved bucket exists durably either way; keep it as the
            // placeholder even if the append below fails.
            *current = Some(bucket.clone());
            self.current_start.send_replace(Some(bucket.start));
        }

        let stored = self.store.append_point(bucket.id, &point).await?;

        if let Some(b) = current.as_mut().filter(|b| b.id == bucket.id) {
            b.point_count += 1;
        }
        self.board.point_buffered(bucket.id, point.timestamp);

        // A late point can reopen a completed bucket or fill an empty placeholder
        let is_current = current.as_ref().is_some_and(|b| b.id == bucket.id);
        if switched || !is_current {
            let current_start = current.as_ref().map(|b| b.start);
            match self.store.uploadable_buckets(current_start).await {
                Ok(queued) => self.board.set_queued_buckets(queued.len() as u64),
                Err(e) => warn!(error = %e, "Failed to refresh queued bucket count"),
            }
        }

        Ok(stored)
    }
}
