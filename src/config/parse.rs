use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);

    // Check for unexpanded environment variables
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;

    // Expand tilde in all paths
    expand_paths(&mut config);

    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut unexpanded: Vec<&str> = re
        .captures_iter(yaml)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    let message = if unexpanded.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=...\n\
             2. Replace $env{{{0}}} in the config file with an actual value",
            unexpanded[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             Set them, or replace the references in the config file with actual values",
            unexpanded.join(", ")
        )
    };

    Err(ConfigError::Validation(message))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    // Expand storage path
    config.storage.path = expand_tilde(&config.storage.path);

    // Expand replay path, "-" means stdin
    if let Some(replay) = config.replay.as_mut() {
        if replay.path != Path::new("-") {
            replay.path = expand_tilde(&replay.path);
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_sampling(&config.sampling, &mut errors);

    if config.buckets.window < std::time::Duration::from_secs(1) {
        errors.push("buckets.window must be at least 1s".to_string());
    } else if config.buckets.window.subsec_nanos() != 0 {
        errors.push("buckets.window must be a whole number of seconds".to_string());
    }

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    validate_sink(&config.sink, &mut errors);

    if config.schedule.heartbeat_enabled && config.schedule.heartbeat_interval.is_zero() {
        errors.push("schedule.heartbeat_interval must be greater than zero".to_string());
    }

    if let Some(status) = &config.status {
        if status.listen.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "status.listen: '{}' is not a valid socket address (expected host:port)",
                status.listen
            ));
        }
    }

    if let Some(replay) = &config.replay {
        validate_replay(replay, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_sampling(sampling: &SamplingConfig, errors: &mut Vec<String>) {
    let accuracy = sampling.max_horizontal_accuracy;
    if !accuracy.is_finite() || accuracy <= 0.0 {
        errors.push(format!(
            "sampling.max_horizontal_accuracy must be a positive number of meters, got {}",
            accuracy
        ));
    }

    if sampling.moving_types.is_empty() {
        errors.push("sampling.moving_types must list at least one motion type".to_string());
    }

    let mut seen = HashSet::new();
    for motion in &sampling.moving_types {
        if !seen.insert(motion) {
            errors.push(format!("sampling.moving_types: duplicate entry '{}'", motion));
        }
    }

    if sampling.mailbox_capacity == 0 {
        errors.push("sampling.mailbox_capacity must be greater than zero".to_string());
    }
}

fn validate_sink(sink: &SinkConfig, errors: &mut Vec<String>) {
    if sink.url.is_empty() {
        errors.push("sink.url cannot be empty".to_string());
    } else if !sink.url.starts_with("http://") && !sink.url.starts_with("https://") {
        errors.push(format!(
            "sink.url: '{}' must start with http:// or https://",
            sink.url
        ));
    }

    if sink.timeout.is_zero() {
        errors.push("sink.timeout must be greater than zero".to_string());
    }
}

fn validate_replay(replay: &ReplayConfig, errors: &mut Vec<String>) {
    if replay.path.as_os_str().is_empty() {
        errors.push("replay.path cannot be empty (use '-' for stdin)".to_string());
    } else if replay.path != PathBuf::from("-") && !replay.path.exists() {
        errors.push(format!(
            "replay.path: '{}' does not exist",
            replay.path.display()
        ));
    }

    if !replay.significant_distance.is_finite() || replay.significant_distance < 0.0 {
        errors.push(format!(
            "replay.significant_distance must be zero or more meters, got {}",
            replay.significant_distance
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::MotionType;
    use std::time::Duration;

    const MINIMAL: &str = r#"
storage:
  path: /tmp/tracklog-test.duckdb
sink:
  url: http://127.0.0.1:8000
"#;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.sampling.required_motion_seconds, 10);
        assert_eq!(config.sampling.max_horizontal_accuracy, 50.0);
        assert_eq!(config.sampling.moving_types, MotionType::default_moving());
        assert_eq!(config.buckets.window, Duration::from_secs(60));
        assert_eq!(config.sink.timeout, Duration::from_secs(30));
        assert_eq!(config.schedule.heartbeat_interval, Duration::from_secs(30));
        assert!(config.schedule.auto_upload_at_midnight);
        assert!(config.status.is_none());
        assert!(config.replay.is_none());
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = r#"
buckets:
  window: 5m
storage:
  path: /tmp/tracklog-test.duckdb
sink:
  url: https://sink.example.com
  timeout: 1m 30s
schedule:
  heartbeat_interval: 45s
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.buckets.window, Duration::from_secs(300));
        assert_eq!(config.sink.timeout, Duration::from_secs(90));
        assert_eq!(config.schedule.heartbeat_interval, Duration::from_secs(45));
    }

    #[test]
    fn test_all_problems_reported_together() {
        let yaml = r#"
sampling:
  max_horizontal_accuracy: -5
  moving_types: [walking, walking]
buckets:
  window: 500ms
storage:
  path: /tmp/tracklog-test.duckdb
sink:
  url: ftp://nope
status:
  listen: not-an-address
"#;
        match parse_config(yaml) {
            Err(ConfigError::ValidationList(errors)) => {
                assert_eq!(errors.len(), 5, "{:?}", errors);
                assert!(errors.iter().any(|e| e.contains("max_horizontal_accuracy")));
                assert!(errors.iter().any(|e| e.contains("duplicate entry 'walking'")));
                assert!(errors.iter().any(|e| e.contains("buckets.window")));
                assert!(errors.iter().any(|e| e.contains("sink.url")));
                assert!(errors.iter().any(|e| e.contains("status.listen")));
            }
            other => panic!("expected ValidationList, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_motion_type_is_yaml_error() {
        let yaml = r#"
sampling:
  moving_types: [teleporting]
storage:
  path: /tmp/tracklog-test.duckdb
sink:
  url: http://127.0.0.1:8000
"#;
        assert!(matches!(parse_config(yaml), Err(ConfigError::YamlParse(_))));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let yaml = r#"
storage:
  path: $env{TRACKLOG_TEST_SURELY_UNSET}/points.duckdb
sink:
  url: http://127.0.0.1:8000
"#;
        match parse_config(yaml) {
            Err(ConfigError::Validation(message)) => {
                assert!(message.contains("TRACKLOG_TEST_SURELY_UNSET"));
            }
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_stdin_replay_path_is_kept() {
        let yaml = r#"
storage:
  path: /tmp/tracklog-test.duckdb
sink:
  url: http://127.0.0.1:8000
replay:
  path: "-"
"#;
        let config = parse_config(yaml).unwrap();
        let replay = config.replay.unwrap();
        assert_eq!(replay.path, PathBuf::from("-"));
        assert_eq!(replay.significant_distance, 500.0);
        assert!(!replay.realtime);
    }
}
