use crate::motion::MotionType;
use crate::source::Fix;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Durable point and bucket persistence.
///
/// Buckets form an arena keyed by id with a unique window start; points are
/// owned by exactly one bucket and only refer back to it by id.
#[async_trait]
pub trait Store: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Return the bucket for `window`, creating a pending one if none exists.
    /// Concurrent calls for the same window resolve to the same bucket.
    async fn lookup_or_create_bucket(&self, window: &BucketWindow) -> Result<Bucket, StorageError>;

    async fn get_bucket(&self, bucket_id: Uuid) -> Result<Option<Bucket>, StorageError>;

    /// All buckets, oldest window first.
    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError>;

    /// Append a point after the bucket's existing points. A completed bucket
    /// receiving a late point goes back to pending.
    async fn append_point(&self, bucket_id: Uuid, point: &Point) -> Result<StoredPoint, StorageError>;

    /// Points of a bucket in arrival order.
    async fn bucket_points(&self, bucket_id: Uuid) -> Result<Vec<StoredPoint>, StorageError>;

    /// Non-completed, non-empty buckets other than the one starting at
    /// `current_start`, ordered by start ascending.
    async fn uploadable_buckets(
        &self,
        current_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bucket>, StorageError>;

    /// Purge points up to and including `through_seq` after a confirmed
    /// delivery. The bucket is marked completed when nothing is left.
    async fn complete_bucket(
        &self,
        bucket_id: Uuid,
        through_seq: u64,
        at: DateTime<Utc>,
    ) -> Result<Completion, StorageError>;

    /// Bump the retry counter and last-attempt time; points and status stay.
    async fn record_failed_attempt(&self, bucket_id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Points still waiting for delivery, across all buckets.
    async fn buffered_point_count(&self) -> Result<u64, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("database connection lock poisoned")]
    LockPoisoned,

    #[error("bucket not found: {0}")]
    BucketNotFound(Uuid),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    Pending,
    Completed,
}

impl BucketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketStatus::Pending => "pending",
            BucketStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BucketStatus::Pending),
            "completed" => Ok(BucketStatus::Completed),
            other => Err(StorageError::Corrupt(format!("unknown bucket status '{}'", other))),
        }
    }
}

/// Half-open time window `[start, end)` a bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BucketWindow {
    /// Window of width `width` containing `timestamp`, aligned to the Unix epoch.
    pub fn containing(timestamp: DateTime<Utc>, width: Duration) -> BucketWindow {
        let width_us = (width.as_micros() as i64).max(1);
        let ts_us = timestamp.timestamp_micros();
        let start_us = ts_us.div_euclid(width_us) * width_us;

        let start = DateTime::from_timestamp_micros(start_us).unwrap_or(timestamp);
        let end = start + chrono::Duration::microseconds(width_us);
        BucketWindow { start, end }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    /// Generated bucket name, e.g. `bucket-20260128T100000Z`.
    pub fn name(&self) -> String {
        format!("bucket-{}", self.start.format("%Y%m%dT%H%M%SZ"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub id: Uuid,
    pub name: String,
    pub start: DateTime<Utc>,
    /// Exclusive.
    pub end: DateTime<Utc>,
    pub status: BucketStatus,
    pub retry_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub point_count: u64,
}

impl Bucket {
    pub fn window(&self) -> BucketWindow {
        BucketWindow {
            start: self.start,
            end: self.end,
        }
    }
}

/// A filtered position sample tagged with the motion type at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub motion: MotionType,
}

impl Point {
    pub fn from_fix(fix: &Fix, motion: MotionType) -> Self {
        Self {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            speed: fix.speed,
            horizontal_accuracy: fix.horizontal_accuracy,
            vertical_accuracy: fix.vertical_accuracy,
            motion,
        }
    }
}

/// A point as persisted: owning bucket id plus its arrival sequence number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPoint {
    pub bucket_id: Uuid,
    pub seq: u64,
    pub point: Point,
}

/// Result of committing a delivered bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub purged: u64,
    /// False when points arrived after the upload was read; the bucket stays pending.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_floors_to_width() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 15).unwrap();
        let window = BucketWindow::containing(ts, Duration::from_secs(60));

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 1, 28, 10, 1, 0).unwrap());
        assert!(window.contains(ts));
        assert!(!window.contains(window.end));
        assert!(window.contains(window.start));
    }

    #[test]
    fn test_window_boundary_belongs_to_next_bucket() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 28, 10, 1, 0).unwrap();
        let window = BucketWindow::containing(ts, Duration::from_secs(60));
        assert_eq!(window.start, ts);
    }

    #[test]
    fn test_window_before_epoch_floors_downward() {
        let ts = DateTime::from_timestamp(-30, 0).unwrap();
        let window = BucketWindow::containing(ts, Duration::from_secs(60));
        assert_eq!(window.start.timestamp(), -60);
        assert_eq!(window.end.timestamp(), 0);
    }

    #[test]
    fn test_window_name() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 45).unwrap();
        let window = BucketWindow::containing(ts, Duration::from_secs(60));
        assert_eq!(window.name(), "bucket-20260128T100000Z");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("pending".parse::<BucketStatus>().unwrap(), BucketStatus::Pending);
        assert_eq!(BucketStatus::Completed.to_string(), "completed");
        assert!("uploading".parse::<BucketStatus>().is_err());
    }
}
