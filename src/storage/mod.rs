pub mod duckdb;
#[cfg(test)]
pub(crate) mod flaky;
pub mod traits;

pub use self::duckdb::DuckDbStore;
pub use traits::{
    Bucket, BucketStatus, BucketWindow, Completion, Point, Store, StorageError, StoredPoint,
};
