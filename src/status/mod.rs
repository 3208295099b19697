//! Observable state of the tracker.
//!
//! The core is the only writer. Readers either take a [`StatusSnapshot`] or
//! subscribe to typed [`StatusEvent`]s; neither side knows about any UI toolkit.

use crate::motion::{DutyCycleState, MotionType, SamplingMode, TransitionEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Points persisted but not yet delivered.
    pub buffered_points: u64,
    /// Non-current buckets waiting for upload.
    pub queued_buckets: u64,
    pub last_point_at: Option<DateTime<Utc>>,
    pub last_upload_attempt_at: Option<DateTime<Utc>>,
    pub last_upload_error: Option<String>,
    pub map_refresh_error: Option<String>,
    pub sampling_mode: SamplingMode,
    pub duty_cycle: DutyCycleState,
    pub motion: MotionType,
    pub sampling_halted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Transition(TransitionEvent),
    PointBuffered {
        bucket_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    BucketUploaded {
        bucket_id: Uuid,
        points: u64,
    },
    UploadFailed {
        bucket_id: Option<Uuid>,
        error: String,
    },
    SamplingHalted,
    SamplingResumed,
    MapRefreshFailed {
        error: String,
    },
}

struct BoardInner {
    snapshot: watch::Sender<StatusSnapshot>,
    events: broadcast::Sender<StatusEvent>,
}

/// Shared handle to the observable counters and signals.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(StatusSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(BoardInner { snapshot, events }),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        self.inner.snapshot.send_modify(f);
    }

    fn emit(&self, event: StatusEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn set_counters(&self, buffered_points: u64, queued_buckets: u64) {
        self.update(|s| {
            s.buffered_points = buffered_points;
            s.queued_buckets = queued_buckets;
        });
    }

    pub(crate) fn set_queued_buckets(&self, queued_buckets: u64) {
        self.update(|s| s.queued_buckets = queued_buckets);
    }

    pub(crate) fn point_buffered(&self, bucket_id: Uuid, timestamp: DateTime<Utc>) {
        self.update(|s| {
            s.buffered_points += 1;
            s.last_point_at = Some(s.last_point_at.map_or(timestamp, |t| t.max(timestamp)));
        });
        self.emit(StatusEvent::PointBuffered {
            bucket_id,
            timestamp,
        });
    }

    pub(crate) fn upload_attempted(&self, at: DateTime<Utc>) {
        self.update(|s| s.last_upload_attempt_at = Some(at));
    }

    pub(crate) fn bucket_uploaded(&self, bucket_id: Uuid, points: u64, bucket_completed: bool) {
        self.update(|s| {
            s.buffered_points = s.buffered_points.saturating_sub(points);
            if bucket_completed {
                s.queued_buckets = s.queued_buckets.saturating_sub(1);
            }
            s.last_upload_error = None;
        });
        self.emit(StatusEvent::BucketUploaded { bucket_id, points });
    }

    pub(crate) fn upload_failed(&self, bucket_id: Option<Uuid>, error: String) {
        self.update(|s| s.last_upload_error = Some(error.clone()));
        self.emit(StatusEvent::UploadFailed { bucket_id, error });
    }

    pub(crate) fn map_refreshed(&self, result: Result<(), String>) {
        match result {
            Ok(()) => self.update(|s| s.map_refresh_error = None),
            Err(error) => {
                self.update(|s| s.map_refresh_error = Some(error.clone()));
                self.emit(StatusEvent::MapRefreshFailed { error });
            }
        }
    }

    pub(crate) fn motion_changed(&self, motion: MotionType) {
        self.update(|s| s.motion = motion);
    }

    pub(crate) fn duty_cycle_changed(&self, state: DutyCycleState) {
        self.update(|s| s.duty_cycle = state);
    }

    pub(crate) fn transition(&self, event: TransitionEvent) {
        self.update(|s| {
            s.duty_cycle = event.to;
            s.sampling_mode = event.mode;
        });
        self.emit(StatusEvent::Transition(event));
    }

    pub(crate) fn sampling_halted(&self, halted: bool) {
        let changed = self.inner.snapshot.send_if_modified(|s| {
            let changed = s.sampling_halted != halted;
            s.sampling_halted = halted;
            changed
        });
        if changed {
            self.emit(if halted {
                StatusEvent::SamplingHalted
            } else {
                StatusEvent::SamplingResumed
            });
        }
    }
}
