pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# TRACKLOG CONFIGURATION
# =============================================================================
# Tracklog samples positions on a motion-driven duty cycle, buffers them in
# fixed-width time buckets on disk, and uploads each bucket to a sink once the
# bucket is no longer current.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/tracklog/config.yml
#   3. /etc/tracklog/config.yml
#
# Values may reference environment variables as $env{NAME}.

# =============================================================================
# SAMPLING
# =============================================================================

sampling:
  # How long a motion classification must persist before switching between
  # low-power and continuous sampling. 0 switches immediately.
  required_motion_seconds: 10
  # Classifications that count as moving. Anything else is stationary.
  # Options: stationary, walking, running, cycling, automotive, unknown
  moving_types: [walking, running, cycling, automotive]
  # Fixes with a larger horizontal accuracy radius (meters) are dropped
  max_horizontal_accuracy: 50.0

# =============================================================================
# BUCKETS
# =============================================================================

buckets:
  # Width of each upload bucket
  window: 1m

# =============================================================================
# STORAGE
# =============================================================================

storage:
  # DuckDB file holding buffered points until they are delivered
  path: ~/.local/share/tracklog/points.duckdb

# =============================================================================
# SINK
# =============================================================================

sink:
  url: http://127.0.0.1:8000
  # Deadline for every upload, heartbeat and status call
  timeout: 30s

# =============================================================================
# SCHEDULE
# =============================================================================

schedule:
  heartbeat_interval: 30s
  heartbeat_enabled: true
  # Upload all queued buckets at local midnight
  auto_upload_at_midnight: true

# =============================================================================
# STATUS API (optional)
# =============================================================================
# Local HTTP endpoint exposing counters and upload controls.

status:
  listen: 127.0.0.1:7105

# =============================================================================
# REPLAY (optional)
# =============================================================================
# Drive tracklog from a JSON-lines file of motion and fix events instead of
# live sensors. Use '-' to read from stdin.
#
# replay:
#   path: ~/tracks/commute.jsonl
#   significant_distance: 500.0
#   realtime: false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_parses() {
        let config = parse_config(&generate_starter_config()).unwrap();
        assert_eq!(config.sampling.moving_types.len(), 4);
        assert_eq!(config.status.unwrap().listen, "127.0.0.1:7105");
        assert!(config.replay.is_none());
    }
}
