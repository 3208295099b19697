use crate::motion::SamplingMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw position fix as delivered by the platform position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: f64,
    /// Ground speed in m/s, negative when unknown.
    #[serde(default = "unknown_speed")]
    pub speed: f64,
    /// Radius of the horizontal uncertainty circle in meters.
    pub horizontal_accuracy: f64,
    #[serde(default = "unknown_accuracy")]
    pub vertical_accuracy: f64,
}

fn unknown_speed() -> f64 {
    -1.0
}

fn unknown_accuracy() -> f64 {
    -1.0
}

impl Fix {
    /// True when every numeric field can be encoded for upload. Unknown
    /// measures are -1, never NaN.
    pub fn is_finite(&self) -> bool {
        [
            self.latitude,
            self.longitude,
            self.altitude,
            self.speed,
            self.horizontal_accuracy,
            self.vertical_accuracy,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionSourceError {
    #[error("location permission revoked")]
    PermissionRevoked,

    #[error("position source unavailable: {0}")]
    Unavailable(String),
}

/// Control surface of the platform position sampler.
///
/// Implementations only need to perform the switch; the duty cycle guarantees
/// it never asks for the mode the source is already in.
pub trait PositionSource: Send {
    fn set_mode(&mut self, mode: SamplingMode) -> Result<(), PositionSourceError>;

    fn mode(&self) -> SamplingMode;
}

/// Position source that only records the requested mode.
///
/// Used when fixes arrive from somewhere that cannot be steered, and in tests.
#[derive(Debug, Default)]
pub struct RecordingPositionSource {
    mode: SamplingMode,
    switches: Vec<SamplingMode>,
    revoked: bool,
}

impl RecordingPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following mode switch fail with `PermissionRevoked`.
    pub fn revoke(&mut self) {
        self.revoked = true;
    }

    pub fn restore(&mut self) {
        self.revoked = false;
    }

    /// Every switch that reached the source, in order.
    pub fn switches(&self) -> &[SamplingMode] {
        &self.switches
    }
}

impl PositionSource for RecordingPositionSource {
    fn set_mode(&mut self, mode: SamplingMode) -> Result<(), PositionSourceError> {
        if self.revoked {
            return Err(PositionSourceError::PermissionRevoked);
        }
        self.mode = mode;
        self.switches.push(mode);
        Ok(())
    }

    fn mode(&self) -> SamplingMode {
        self.mode
    }
}
