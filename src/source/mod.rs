pub mod position;
pub mod replay;

pub use position::{Fix, PositionSource, PositionSourceError, RecordingPositionSource};
pub use replay::{
    haversine_distance, ReplayError, ReplayPositionSource, ReplayReader, ReplayRecord, ReplayStats,
};
