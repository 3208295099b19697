//! Store wrapper whose writes can be switched to fail, for exercising the
//! storage error paths of the ingest and upload lanes.

use super::{
    Bucket, BucketWindow, Completion, DuckDbStore, Point, Store, StorageError, StoredPoint,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

pub(crate) struct FlakyStore {
    inner: DuckDbStore,
    pub fail_append: AtomicBool,
    pub fail_complete: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Self {
        let inner = DuckDbStore::in_memory().unwrap();
        inner.init_schema().await.unwrap();
        Self {
            inner,
            fail_append: AtomicBool::new(false),
            fail_complete: AtomicBool::new(false),
        }
    }

    fn injected(flag: &AtomicBool, op: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Database(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.inner.init_schema().await
    }

    async fn lookup_or_create_bucket(&self, window: &BucketWindow) -> Result<Bucket, StorageError> {
        self.inner.lookup_or_create_bucket(window).await
    }

    async fn get_bucket(&self, bucket_id: Uuid) -> Result<Option<Bucket>, StorageError> {
        self.inner.get_bucket(bucket_id).await
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError> {
        self.inner.list_buckets().await
    }

    async fn append_point(&self, bucket_id: Uuid, point: &Point) -> Result<StoredPoint, StorageError> {
        Self::injected(&self.fail_append, "append")?;
        self.inner.append_point(bucket_id, point).await
    }

    async fn bucket_points(&self, bucket_id: Uuid) -> Result<Vec<StoredPoint>, StorageError> {
        self.inner.bucket_points(bucket_id).await
    }

    async fn uploadable_buckets(
        &self,
        current_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bucket>, StorageError> {
        self.inner.uploadable_buckets(current_start).await
    }

    async fn complete_bucket(
        &self,
        bucket_id: Uuid,
        through_seq: u64,
        at: DateTime<Utc>,
    ) -> Result<Completion, StorageError> {
        Self::injected(&self.fail_complete, "complete")?;
        self.inner.complete_bucket(bucket_id, through_seq, at).await
    }

    async fn record_failed_attempt(&self, bucket_id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.inner.record_failed_attempt(bucket_id, at).await
    }

    async fn buffered_point_count(&self) -> Result<u64, StorageError> {
        self.inner.buffered_point_count().await
    }
}
