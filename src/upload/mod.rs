pub mod coordinator;
pub mod sink;
pub mod wire;

pub use coordinator::{CycleOutcome, CycleReport, UploadCoordinator, UploadError};
pub use sink::{HttpSink, Sink, SinkError};
pub use wire::{
    CoordinateRow, CoordinatesQuery, CoordinatesResponse, Feature, SinkStatus, UploadBatch,
    WireError,
};
