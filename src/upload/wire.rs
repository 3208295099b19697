//! JSON payloads exchanged with the remote sink.
//!
//! Uploads are GeoJSON `Feature`s wrapped in `{"locations": [...]}`. Fields the
//! tracker does not measure are sent as `-1` or `"unknown"`.

use crate::motion::MotionType;
use crate::storage::{Point, StoredPoint};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UNKNOWN_MEASURE: f64 = -1.0;
pub const UNKNOWN_WIFI: &str = "unknown";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("point at {timestamp} has a non-finite {field}")]
    NonFinite {
        timestamp: DateTime<Utc>,
        field: &'static str,
    },

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatch {
    pub locations: Vec<Feature>,
}

impl UploadBatch {
    /// Encode stored points in the order given.
    pub fn from_points(points: &[StoredPoint]) -> Result<Self, WireError> {
        let locations = points
            .iter()
            .map(|p| Feature::from_point(&p.point))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { locations })
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Geometry,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub speed: f64,
    pub motion: Vec<MotionType>,
    pub timestamp: String,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub altitude: f64,
    pub course: f64,
    pub course_accuracy: f64,
    pub speed_accuracy: f64,
    pub wifi: String,
}

impl Feature {
    pub fn from_point(point: &Point) -> Result<Self, WireError> {
        let checks = [
            ("latitude", point.latitude),
            ("longitude", point.longitude),
            ("altitude", point.altitude),
            ("speed", point.speed),
            ("horizontal_accuracy", point.horizontal_accuracy),
            ("vertical_accuracy", point.vertical_accuracy),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, v)| !v.is_finite()) {
            return Err(WireError::NonFinite {
                timestamp: point.timestamp,
                field: *field,
            });
        }

        Ok(Self {
            kind: "Feature".to_string(),
            geometry: Geometry {
                kind: "Point".to_string(),
                coordinates: [point.longitude, point.latitude],
            },
            properties: Properties {
                speed: point.speed,
                motion: vec![point.motion],
                timestamp: point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                horizontal_accuracy: point.horizontal_accuracy,
                vertical_accuracy: point.vertical_accuracy,
                altitude: point.altitude,
                course: UNKNOWN_MEASURE,
                course_accuracy: UNKNOWN_MEASURE,
                speed_accuracy: UNKNOWN_MEASURE,
                wifi: UNKNOWN_WIFI.to_string(),
            },
        })
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkStatus {
    pub status: String,
}

impl SinkStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Query for `GET /coordinates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatesQuery {
    pub lookback_hours: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,
}

impl Default for CoordinatesQuery {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            min_accuracy: None,
            max_distance: None,
        }
    }
}

/// One row of history: `[timestamp, latitude, longitude, accuracy]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRow(pub String, pub f64, pub f64, pub f64);

impl CoordinateRow {
    pub fn timestamp(&self) -> &str {
        &self.0
    }

    pub fn latitude(&self) -> f64 {
        self.1
    }

    pub fn longitude(&self) -> f64 {
        self.2
    }

    pub fn accuracy(&self) -> f64 {
        self.3
    }
}

/// Body of `GET /coordinates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatesResponse {
    pub status: String,
    pub count: usize,
    pub lookback_hours: u32,
    pub coordinates: Vec<CoordinateRow>,
}
