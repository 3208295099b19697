use super::traits::{
    Bucket, BucketStatus, BucketWindow, Completion, Point, Store, StorageError, StoredPoint,
};
use crate::motion::MotionType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const BUCKET_COLUMNS: &str = "b.bucket_id, b.name, b.start_us, b.end_us, b.status, b.retry_count, b.last_attempt_us,
     (SELECT COUNT(*) FROM points p WHERE p.bucket_id = b.bucket_id) AS point_count";

const POINT_COLUMNS: &str = "bucket_id, seq, timestamp_us, latitude, longitude, altitude, speed,
     horizontal_accuracy, vertical_accuracy, motion";

/// DuckDB implementation of the Store trait.
///
/// Timestamps are stored as epoch microseconds so window starts compare exactly.
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "failed to create storage directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened point store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests and dry runs.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("task join error: {}", e)))?
    }
}

fn conversion_error(
    idx: usize,
    ty: duckdb::types::Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn timestamp_at(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(idx, duckdb::types::Type::BigInt, invalid("invalid timestamp")))
}

fn uuid_at(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<Uuid> {
    let text: String = row.get(idx)?;
    Uuid::parse_str(&text).map_err(|e| conversion_error(idx, duckdb::types::Type::Text, e))
}

fn bucket_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Bucket> {
    let status: String = row.get(4)?;
    let status = status
        .parse::<BucketStatus>()
        .map_err(|e| conversion_error(4, duckdb::types::Type::Text, e))?;

    let last_attempt = match row.get::<_, Option<i64>>(6)? {
        Some(micros) => Some(DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            conversion_error(6, duckdb::types::Type::BigInt, invalid("invalid timestamp"))
        })?),
        None => None,
    };

    Ok(Bucket {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        start: timestamp_at(row, 2)?,
        end: timestamp_at(row, 3)?,
        status,
        retry_count: row.get::<_, i64>(5)?.max(0) as u32,
        last_attempt,
        point_count: row.get::<_, i64>(7)?.max(0) as u64,
    })
}

fn point_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<StoredPoint> {
    let motion: String = row.get(9)?;
    let motion = motion
        .parse::<MotionType>()
        .map_err(|e| conversion_error(9, duckdb::types::Type::Text, e))?;

    Ok(StoredPoint {
        bucket_id: uuid_at(row, 0)?,
        seq: row.get::<_, i64>(1)?.max(0) as u64,
        point: Point {
            timestamp: timestamp_at(row, 2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            altitude: row.get(5)?,
            speed: row.get(6)?,
            horizontal_accuracy: row.get(7)?,
            vertical_accuracy: row.get(8)?,
            motion,
        },
    })
}

fn select_bucket(conn: &Connection, bucket_id: &str) -> Result<Option<Bucket>, StorageError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM buckets b WHERE b.bucket_id = ?",
        BUCKET_COLUMNS
    ))?;
    let mut rows = stmt.query(params![bucket_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(bucket_from_row(row)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl Store for DuckDbStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS buckets (
                    bucket_id VARCHAR PRIMARY KEY,
                    name VARCHAR NOT NULL,
                    start_us BIGINT NOT NULL UNIQUE,
                    end_us BIGINT NOT NULL,
                    status VARCHAR NOT NULL,
                    retry_count BIGINT NOT NULL DEFAULT 0,
                    last_attempt_us BIGINT
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS points (
                    bucket_id VARCHAR NOT NULL,
                    seq BIGINT NOT NULL,
                    timestamp_us BIGINT NOT NULL,
                    latitude DOUBLE NOT NULL,
                    longitude DOUBLE NOT NULL,
                    altitude DOUBLE NOT NULL,
                    speed DOUBLE NOT NULL,
                    horizontal_accuracy DOUBLE NOT NULL,
                    vertical_accuracy DOUBLE NOT NULL,
                    motion VARCHAR NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_points_bucket ON points(bucket_id)",
                [],
            )?;

            Ok(())
        })
        .await
    }

    async fn lookup_or_create_bucket(&self, window: &BucketWindow) -> Result<Bucket, StorageError> {
        let window = *window;

        self.with_conn(move |conn| {
            let start_us = window.start.timestamp_micros();
            let inserted = conn.execute(
                "INSERT INTO buckets (bucket_id, name, start_us, end_us, status, retry_count)
                 VALUES (?, ?, ?, ?, 'pending', 0)
                 ON CONFLICT DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    window.name(),
                    start_us,
                    window.end.timestamp_micros(),
                ],
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM buckets b WHERE b.start_us = ?",
                BUCKET_COLUMNS
            ))?;
            let mut rows = stmt.query(params![start_us])?;
            let bucket = match rows.next()? {
                Some(row) => bucket_from_row(row)?,
                None => {
                    return Err(StorageError::Database(format!(
                        "bucket for window starting {} vanished after insert",
                        window.start
                    )))
                }
            };

            if inserted > 0 {
                tracing::debug!(bucket = %bucket.name, bucket_id = %bucket.id, "Created bucket");
            }
            Ok(bucket)
        })
        .await
    }

    async fn get_bucket(&self, bucket_id: Uuid) -> Result<Option<Bucket>, StorageError> {
        self.with_conn(move |conn| select_bucket(conn, &bucket_id.to_string()))
            .await
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM buckets b ORDER BY b.start_us ASC",
                BUCKET_COLUMNS
            ))?;
            let rows = stmt.query_map([], bucket_from_row)?;

            let mut buckets = Vec::new();
            for row in rows {
                buckets.push(row?);
            }
            Ok(buckets)
        })
        .await
    }

    async fn append_point(&self, bucket_id: Uuid, point: &Point) -> Result<StoredPoint, StorageError> {
        let point = point.clone();

        self.with_conn(move |conn| {
            let id = bucket_id.to_string();
            let tx = conn.transaction()?;

            let exists: i64 = tx.query_row(
                "SELECT COUNT(*) FROM buckets WHERE bucket_id = ?",
                params![id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StorageError::BucketNotFound(bucket_id));
            }

            let seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM points WHERE bucket_id = ?",
                params![id],
                |row| row.get(0),
            )?;

            tx.execute(
                &format!(
                    "INSERT INTO points ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    POINT_COLUMNS
                ),
                params![
                    id,
                    seq,
                    point.timestamp.timestamp_micros(),
                    point.latitude,
                    point.longitude,
                    point.altitude,
                    point.speed,
                    point.horizontal_accuracy,
                    point.vertical_accuracy,
                    point.motion.as_str(),
                ],
            )?;

            let reopened = tx.execute(
                "UPDATE buckets SET status = 'pending' WHERE bucket_id = ? AND status = 'completed'",
                params![id],
            )?;

            tx.commit()?;

            if reopened > 0 {
                tracing::info!(bucket_id = %bucket_id, "Late point reopened completed bucket");
            }

            Ok(StoredPoint {
                bucket_id,
                seq: seq.max(0) as u64,
                point,
            })
        })
        .await
    }

    async fn bucket_points(&self, bucket_id: Uuid) -> Result<Vec<StoredPoint>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM points WHERE bucket_id = ? ORDER BY seq ASC",
                POINT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![bucket_id.to_string()], point_from_row)?;

            let mut points = Vec::new();
            for row in rows {
                points.push(row?);
            }
            Ok(points)
        })
        .await
    }

    async fn uploadable_buckets(
        &self,
        current_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bucket>, StorageError> {
        let current_us = current_start
            .map(|start| start.timestamp_micros())
            .unwrap_or(i64::MIN);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM buckets b
                 WHERE b.status <> 'completed'
                   AND b.start_us <> ?
                   AND EXISTS (SELECT 1 FROM points p WHERE p.bucket_id = b.bucket_id)
                 ORDER BY b.start_us ASC",
                BUCKET_COLUMNS
            ))?;
            let rows = stmt.query_map(params![current_us], bucket_from_row)?;

            let mut buckets = Vec::new();
            for row in rows {
                buckets.push(row?);
            }
            Ok(buckets)
        })
        .await
    }

    async fn complete_bucket(
        &self,
        bucket_id: Uuid,
        through_seq: u64,
        at: DateTime<Utc>,
    ) -> Result<Completion, StorageError> {
        self.with_conn(move |conn| {
            let id = bucket_id.to_string();
            let tx = conn.transaction()?;

            let purged = tx.execute(
                "DELETE FROM points WHERE bucket_id = ? AND seq <= ?",
                params![id, through_seq as i64],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM points WHERE bucket_id = ?",
                params![id],
                |row| row.get(0),
            )?;

            let completed = remaining == 0;
            let updated = if completed {
                tx.execute(
                    "UPDATE buckets SET status = 'completed', last_attempt_us = ? WHERE bucket_id = ?",
                    params![at.timestamp_micros(), id],
                )?
            } else {
                tx.execute(
                    "UPDATE buckets SET last_attempt_us = ? WHERE bucket_id = ?",
                    params![at.timestamp_micros(), id],
                )?
            };
            if updated == 0 {
                return Err(StorageError::BucketNotFound(bucket_id));
            }

            tx.commit()?;

            Ok(Completion {
                purged: purged as u64,
                completed,
            })
        })
        .await
    }

    async fn record_failed_attempt(&self, bucket_id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE buckets SET retry_count = retry_count + 1, last_attempt_us = ? WHERE bucket_id = ?",
                params![at.timestamp_micros(), bucket_id.to_string()],
            )?;
            if updated == 0 {
                return Err(StorageError::BucketNotFound(bucket_id));
            }
            Ok(())
        })
        .await
    }

    async fn buffered_point_count(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM points", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}
