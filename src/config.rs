//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dsl::{FlowFormat, RetryConfig};
use crate::error::WorkflowError;

const ENV_PREFIX: &str = "XCHATFLOW_";

/// Configuration for the chat flow engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node executions per run before the run fails.
    pub max_steps: usize,
    /// Flow timeout for definitions declaring `timeout: 0`.
    pub default_flow_timeout_ms: u64,
    /// Runs executing at the same time across all sessions.
    pub max_concurrency: usize,
    pub dedup_window_secs: u64,
    /// Sliding window of the alert hit counters.
    pub counter_window_secs: u64,
    /// Per-call bound on a notifier.
    pub notify_timeout_ms: u64,
    pub notify_retry: RetryConfig,
    /// Directory for the file tracker store; in-memory when unset.
    pub tracker_dir: Option<PathBuf>,
    /// Terminal runs older than this are purged.
    pub retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 100,
            default_flow_timeout_ms: 30_000,
            max_concurrency: 16,
            dedup_window_secs: 300,
            counter_window_secs: 3600,
            notify_timeout_ms: 5_000,
            notify_retry: RetryConfig::fixed(2, 500),
            tracker_dir: None,
            retention_secs: 7 * 24 * 3600,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, WorkflowError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| WorkflowError::ConfigError(format!("{}{}={:?}: {}", ENV_PREFIX, key, value, e)))
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, FlowFormat::from_path(path))
    }

    pub fn parse(content: &str, format: FlowFormat) -> Result<Self, WorkflowError> {
        let config = match format {
            FlowFormat::Json => serde_json::from_str(content).map_err(|e| WorkflowError::ConfigError(e.to_string()))?,
            FlowFormat::Yaml => serde_yaml::from_str(content).map_err(|e| WorkflowError::ConfigError(e.to_string()))?,
        };
        Ok(config)
    }

    /// Apply `XCHATFLOW_*` variables from the process environment.
    pub fn with_env_overrides(mut self) -> Result<Self, WorkflowError> {
        self.apply_overrides(std::env::vars())?;
        Ok(self)
    }

    /// Apply `XCHATFLOW_<FIELD>` overrides; other keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), WorkflowError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match field {
                "MAX_STEPS" => self.max_steps = parse_var(field, value)?,
                "DEFAULT_FLOW_TIMEOUT_MS" => self.default_flow_timeout_ms = parse_var(field, value)?,
                "MAX_CONCURRENCY" => self.max_concurrency = parse_var(field, value)?,
                "DEDUP_WINDOW_SECS" => self.dedup_window_secs = parse_var(field, value)?,
                "COUNTER_WINDOW_SECS" => self.counter_window_secs = parse_var(field, value)?,
                "NOTIFY_TIMEOUT_MS" => self.notify_timeout_ms = parse_var(field, value)?,
                "NOTIFY_MAX_RETRIES" => self.notify_retry.max_retries = parse_var(field, value)?,
                "NOTIFY_RETRY_INTERVAL_MS" => self.notify_retry.retry_interval = parse_var(field, value)?,
                "TRACKER_DIR" => {
                    self.tracker_dir = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                "RETENTION_SECS" => self.retention_secs = parse_var(field, value)?,
                _ => tracing::debug!(key = key.as_ref(), "Unknown config override ignored"),
            }
        }
        self.check()
    }

    fn check(&self) -> Result<(), WorkflowError> {
        if self.max_steps == 0 {
            return Err(WorkflowError::ConfigError("max_steps must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(WorkflowError::ConfigError("max_concurrency must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::parse("max_steps: 20\ntracker_dir: /tmp/runs\n", FlowFormat::Yaml).unwrap();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.tracker_dir, Some(PathBuf::from("/tmp/runs")));
        assert_eq!(config.max_concurrency, 16);
        assert_eq!(config.notify_retry.max_retries, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides([
                ("XCHATFLOW_MAX_CONCURRENCY", "4"),
                ("XCHATFLOW_NOTIFY_MAX_RETRIES", "0"),
                ("XCHATFLOW_TRACKER_DIR", "/var/lib/xchatflow"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.notify_retry.max_retries, 0);
        assert_eq!(config.tracker_dir, Some(PathBuf::from("/var/lib/xchatflow")));
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = EngineConfig::default();
        assert!(matches!(
            config.apply_overrides([("XCHATFLOW_MAX_STEPS", "lots")]),
            Err(WorkflowError::ConfigError(_))
        ));
        assert!(config.apply_overrides([("XCHATFLOW_MAX_CONCURRENCY", "0")]).is_err());
    }

    #[test]
    fn test_from_file_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"dedup_window_secs": 60}"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.dedup_window_secs, 60);
        assert!(EngineConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
