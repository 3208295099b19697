use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discrete motion classification reported by the platform motion source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MotionType {
    Stationary,
    Walking,
    Running,
    Cycling,
    Automotive,
    #[default]
    Unknown,
}

impl MotionType {
    pub const ALL: [MotionType; 6] = [
        MotionType::Stationary,
        MotionType::Walking,
        MotionType::Running,
        MotionType::Cycling,
        MotionType::Automotive,
        MotionType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionType::Stationary => "stationary",
            MotionType::Walking => "walking",
            MotionType::Running => "running",
            MotionType::Cycling => "cycling",
            MotionType::Automotive => "automotive",
            MotionType::Unknown => "unknown",
        }
    }

    /// Classifications treated as movement when none are configured.
    pub fn default_moving() -> Vec<MotionType> {
        vec![
            MotionType::Walking,
            MotionType::Running,
            MotionType::Cycling,
            MotionType::Automotive,
        ]
    }
}

impl fmt::Display for MotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown motion type: {0}")]
pub struct UnknownMotionType(pub String);

impl FromStr for MotionType {
    type Err = UnknownMotionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MotionType::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownMotionType(s.to_string()))
    }
}

/// Position sampling mode driven by the duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Low-power sampling, woken only by large location deltas.
    #[default]
    SignificantChange,
    /// High-resolution, high-frequency sampling.
    Continuous,
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplingMode::SignificantChange => f.write_str("significant_change"),
            SamplingMode::Continuous => f.write_str("continuous"),
        }
    }
}
