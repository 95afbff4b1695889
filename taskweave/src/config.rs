//! Engine configuration.
//!
//! Configuration is plain serde data. Every field has a default, so an empty
//! JSON object is a valid configuration. Environment variables overlay a
//! loaded configuration:
//!
//! - `TASKWEAVE_MAX_CONCURRENCY`: in-flight invocation cap
//! - `TASKWEAVE_DEFAULT_TIMEOUT_SECS`: timeout for definitions without one
//! - `TASKWEAVE_CHECKPOINT_PATH`: switches to the file checkpoint store
//! - `TASKWEAVE_LOG`: log filter directive, e.g. `taskweave=debug`
//! - `TASKWEAVE_LOG_JSON`: `true` for JSON log lines

use crate::errors::ConfigError;
use crate::fanout::DEFAULT_MAX_CONCURRENCY;
use crate::invoker::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Where checkpoints are stored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointConfig {
    /// In process memory; lost on exit.
    #[default]
    Memory,
    /// An append-only JSON-lines log.
    File {
        /// Log file path.
        path: PathBuf,
    },
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// An `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum invocations in flight across all maps.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout for definitions that declare none, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry policy for definitions that declare none.
    #[serde(default)]
    pub default_retry: RetryPolicy,
    /// Checkpoint backend.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// Logging setup.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            default_retry: RetryPolicy::default(),
            checkpoint: CheckpointConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded engine config");
        Self::from_json_str(&content)
    }

    /// Builds a configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies environment overrides and validates the result.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup` and validates the result.
    ///
    /// `lookup` receives the environment variable names listed in the module
    /// docs.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TASKWEAVE_MAX_CONCURRENCY") {
            self.max_concurrency = value.trim().parse().map_err(|_| {
                ConfigError::invalid("TASKWEAVE_MAX_CONCURRENCY", format!("not an integer: {value}"))
            })?;
        }
        if let Some(value) = lookup("TASKWEAVE_DEFAULT_TIMEOUT_SECS") {
            self.default_timeout_secs = value.trim().parse().map_err(|_| {
                ConfigError::invalid(
                    "TASKWEAVE_DEFAULT_TIMEOUT_SECS",
                    format!("not an integer: {value}"),
                )
            })?;
        }
        if let Some(value) = lookup("TASKWEAVE_CHECKPOINT_PATH") {
            self.checkpoint = CheckpointConfig::File {
                path: PathBuf::from(value),
            };
        }
        if let Some(value) = lookup("TASKWEAVE_LOG") {
            self.log.level = value;
        }
        if let Some(value) = lookup("TASKWEAVE_LOG_JSON") {
            self.log.json = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        self.validate()?;
        Ok(self)
    }

    /// Checks every field for a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be at least 1"));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::invalid("default_timeout_secs", "must be at least 1"));
        }
        if self.default_retry.base_delay_ms > self.default_retry.max_delay_ms {
            return Err(ConfigError::invalid(
                "default_retry",
                "base_delay_ms exceeds max_delay_ms",
            ));
        }
        if let CheckpointConfig::File { path } = &self.checkpoint {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::invalid("checkpoint.path", "must not be empty"));
            }
        }
        EnvFilter::try_new(&self.log.level)
            .map_err(|e| ConfigError::invalid("log.level", e.to_string()))?;
        Ok(())
    }

    /// Returns the default timeout as a duration.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 64);
        assert_eq!(config.default_timeout(), Duration::from_secs(300));
        assert_eq!(config.checkpoint, CheckpointConfig::Memory);
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_full_json() {
        let config = EngineConfig::from_json_str(
            r#"{
                "max_concurrency": 8,
                "default_timeout_secs": 30,
                "default_retry": {"max_retries": 2, "backoff": "linear", "jitter": "none"},
                "checkpoint": {"kind": "file", "path": "/tmp/taskweave.jsonl"},
                "log": {"level": "taskweave=debug", "json": true}
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.default_retry.max_retries, 2);
        assert_eq!(
            config.checkpoint,
            CheckpointConfig::File {
                path: PathBuf::from("/tmp/taskweave.jsonl")
            }
        );
        assert!(config.log.json);
    }

    #[test]
    fn test_parse_and_validation_errors() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"max_concurrency": 0}"#),
            Err(ConfigError::Invalid { .. })
        ));
        let err = EngineConfig::from_json_str(r#"{"log": {"level": "taskweave=verbose"}}"#).unwrap_err();
        assert!(err.to_string().contains("log.level"));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_overrides(env(&[
                ("TASKWEAVE_MAX_CONCURRENCY", "4"),
                ("TASKWEAVE_DEFAULT_TIMEOUT_SECS", "12"),
                ("TASKWEAVE_CHECKPOINT_PATH", "state/ckpt.jsonl"),
                ("TASKWEAVE_LOG", "warn"),
                ("TASKWEAVE_LOG_JSON", "TRUE"),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.default_timeout_secs, 12);
        assert_eq!(
            config.checkpoint,
            CheckpointConfig::File {
                path: PathBuf::from("state/ckpt.jsonl")
            }
        );
        assert_eq!(config.log, LogConfig { level: "warn".into(), json: true });
    }

    #[test]
    fn test_bad_env_value() {
        let err = EngineConfig::default()
            .with_overrides(env(&[("TASKWEAVE_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("TASKWEAVE_MAX_CONCURRENCY"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"max_concurrency": 3}"#).unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap().max_concurrency, 3);

        assert!(matches!(
            EngineConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
