use crate::motion::MotionType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub buckets: BucketConfig,
    pub storage: StorageConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Local status API; omitted means no listener.
    #[serde(default)]
    pub status: Option<StatusConfig>,
    #[serde(default)]
    pub replay: Option<ReplayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Seconds a classification must persist before the duty cycle commits.
    #[serde(default = "default_required_motion_seconds")]
    pub required_motion_seconds: u64,
    #[serde(default = "default_moving_types")]
    pub moving_types: Vec<MotionType>,
    /// Fixes with a larger accuracy radius (meters) are discarded.
    #[serde(default = "default_max_horizontal_accuracy")]
    pub max_horizontal_accuracy: f64,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_required_motion_seconds() -> u64 {
    10
}

fn default_moving_types() -> Vec<MotionType> {
    MotionType::default_moving()
}

fn default_max_horizontal_accuracy() -> f64 {
    50.0
}

fn default_mailbox_capacity() -> usize {
    1024
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            required_motion_seconds: default_required_motion_seconds(),
            moving_types: default_moving_types(),
            max_horizontal_accuracy: default_max_horizontal_accuracy(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_bucket_window", with = "humantime_serde")]
    pub window: Duration,
}

fn default_bucket_window() -> Duration {
    Duration::from_secs(60)
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            window: default_bucket_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    /// Deadline for every call to the sink.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_true")]
    pub heartbeat_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_upload_at_midnight: bool,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_enabled: true,
            auto_upload_at_midnight: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// JSON-lines event file; `-` reads stdin.
    pub path: PathBuf,
    /// Minimum movement (meters) before a fix is reported in significant-change mode.
    #[serde(default = "default_significant_distance")]
    pub significant_distance: f64,
    /// Replay at recorded pace instead of as fast as possible.
    #[serde(default)]
    pub realtime: bool,
}

fn default_significant_distance() -> f64 {
    500.0
}
