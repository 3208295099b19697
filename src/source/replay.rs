//! Recorded motion and position events played back into the ingestion lane.
//!
//! Input is JSON lines, one event per line:
//!
//! ```text
//! {"type":"motion","motion":"walking","at":"2026-01-28T10:00:00Z"}
//! {"type":"fix","timestamp":"2026-01-28T10:00:05Z","latitude":48.85,"longitude":2.35,"horizontal_accuracy":8.0}
//! {"type":"permission","granted":false}
//! ```

use super::position::{Fix, PositionSource, PositionSourceError};
use crate::config::types::ReplayConfig;
use crate::ingest::{IngestError, IngestHandle};
use crate::motion::{MotionType, SamplingMode};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to open replay input '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    Motion {
        motion: MotionType,
        #[serde(default)]
        at: Option<DateTime<Utc>>,
    },
    Fix(Fix),
    Permission {
        granted: bool,
    },
}

impl ReplayRecord {
    fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            ReplayRecord::Motion { at, .. } => *at,
            ReplayRecord::Fix(fix) => Some(fix.timestamp),
            ReplayRecord::Permission { .. } => None,
        }
    }
}

/// Distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug)]
struct SourceState {
    mode: Mutex<SamplingMode>,
    revoked: AtomicBool,
}

/// Position source whose mode steers what the replay reader lets through.
///
/// In significant-change mode only fixes that moved at least the configured
/// distance from the last delivered fix are forwarded.
#[derive(Debug, Clone)]
pub struct ReplayPositionSource {
    state: Arc<SourceState>,
}

impl Default for ReplayPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayPositionSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SourceState {
                mode: Mutex::new(SamplingMode::SignificantChange),
                revoked: AtomicBool::new(false),
            }),
        }
    }

    fn set_revoked(&self, revoked: bool) {
        self.state.revoked.store(revoked, Ordering::SeqCst);
    }
}

impl PositionSource for ReplayPositionSource {
    fn set_mode(&mut self, mode: SamplingMode) -> Result<(), PositionSourceError> {
        if self.state.revoked.load(Ordering::SeqCst) {
            return Err(PositionSourceError::PermissionRevoked);
        }
        let mut current = self
            .state
            .mode
            .lock()
            .map_err(|_| PositionSourceError::Unavailable("mode lock poisoned".to_string()))?;
        *current = mode;
        Ok(())
    }

    fn mode(&self) -> SamplingMode {
        self.state
            .mode
            .lock()
            .map(|m| *m)
            .unwrap_or(SamplingMode::SignificantChange)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: u64,
    pub motions: u64,
    pub fixes_forwarded: u64,
    pub fixes_suppressed: u64,
    pub parse_errors: u64,
}

/// Reads recorded events and feeds them to the ingestion lane.
pub struct ReplayReader {
    path: PathBuf,
    significant_distance: f64,
    realtime: bool,
    source: ReplayPositionSource,
    last_forwarded: Option<(f64, f64)>,
    last_at: Option<DateTime<Utc>>,
    stats: ReplayStats,
}

impl ReplayReader {
    pub fn new(config: &ReplayConfig, source: ReplayPositionSource) -> Self {
        Self {
            path: config.path.clone(),
            significant_distance: config.significant_distance,
            realtime: config.realtime,
            source,
            last_forwarded: None,
            last_at: None,
            stats: ReplayStats::default(),
        }
    }

    pub async fn run(
        self,
        handle: IngestHandle,
        cancel: CancellationToken,
    ) -> Result<ReplayStats, ReplayError> {
        if self.path == Path::new("-") {
            let reader = BufReader::new(tokio::io::stdin());
            self.run_reader(reader, handle, cancel).await
        } else {
            let file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|source| ReplayError::Open {
                    path: self.path.clone(),
                    source,
                })?;
            self.run_reader(BufReader::new(file), handle, cancel).await
        }
    }

    pub async fn run_reader<R: AsyncBufRead + Unpin>(
        mut self,
        reader: R,
        handle: IngestHandle,
        cancel: CancellationToken,
    ) -> Result<ReplayStats, ReplayError> {
        info!(path = %self.path.display(), realtime = self.realtime, "Replay started");
        let mut lines = reader.lines();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };

            self.stats.lines += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let record: ReplayRecord = match serde_json::from_str(trimmed) {
                Ok(record) => record,
                Err(e) => {
                    self.stats.parse_errors += 1;
                    warn!(line = self.stats.lines, error = %e, "Skipping unparseable replay line");
                    continue;
                }
            };

            if self.realtime {
                self.pace(&record, &cancel).await;
            }
            self.dispatch(record, &handle).await?;
        }

        info!(
            lines = self.stats.lines,
            forwarded = self.stats.fixes_forwarded,
            suppressed = self.stats.fixes_suppressed,
            parse_errors = self.stats.parse_errors,
            "Replay finished"
        );
        Ok(self.stats)
    }

    async fn pace(&mut self, record: &ReplayRecord, cancel: &CancellationToken) {
        let Some(at) = record.at() else { return };
        if let Some(gap) = self.last_at.and_then(|last| (at - last).to_std().ok()) {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(gap) => {}
            }
        }
        self.last_at = Some(at);
    }

    async fn dispatch(&mut self, record: ReplayRecord, handle: &IngestHandle) -> Result<(), ReplayError> {
        match record {
            ReplayRecord::Motion { motion, .. } => {
                self.stats.motions += 1;
                handle.motion(motion).await?;
            }
            ReplayRecord::Fix(fix) => {
                if self.should_forward(&fix) {
                    self.last_forwarded = Some((fix.latitude, fix.longitude));
                    self.stats.fixes_forwarded += 1;
                    handle.fix(fix).await?;
                } else {
                    self.stats.fixes_suppressed += 1;
                }
            }
            ReplayRecord::Permission { granted } => {
                debug!(granted, "Replayed permission change");
                self.source.set_revoked(!granted);
                if granted {
                    handle.permission_restored().await?;
                } else {
                    handle.permission_revoked().await?;
                }
            }
        }
        Ok(())
    }

    fn should_forward(&self, fix: &Fix) -> bool {
        if self.source.mode() == SamplingMode::Continuous {
            return true;
        }
        match self.last_forwarded {
            None => true,
            Some((lat, lon)) => {
                haversine_distance(lat, lon, fix.latitude, fix.longitude)
                    >= self.significant_distance
            }
        }
    }
}
