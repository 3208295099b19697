pub mod bucket_store;
pub mod filter;
pub mod lane;

pub use bucket_store::BucketStore;
pub use filter::PointFilter;
pub use lane::{IngestError, IngestEvent, IngestHandle, IngestLane, LaneStats};
