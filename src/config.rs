//! Configuration types.
//!
//! Loaded once at startup from a YAML file; the API token comes from the
//! environment. Everything downstream treats these values as read-only.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::chain::MAX_CHAIN_DEPTH;
use crate::error::ConfigError;

/// Environment variable holding the config file path.
pub const CONFIG_PATH_ENV: &str = "ACTIVITY_ENGINE_CONFIG";

/// Environment variable holding the GoAPI token.
pub const TOKEN_ENV: &str = "GOAPI_TOKEN";

const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Root configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of root jobs in flight, and of concurrent chains.
    pub max_tasks: usize,
    /// Number of consumer routines.
    pub consumers: usize,
    /// Producer back-off when the budget is full.
    #[serde(default = "default_interval_ms")]
    pub producer_interval_ms: u64,
    pub task: TaskConfig,
    pub goapi: GoApiConfig,
}

/// Per-chain behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Aspect ratio for root jobs, e.g. `16:9`.
    pub ar: String,
    pub prompts: Vec<String>,
    /// Half-open range of actions picked on a root job.
    pub use_buttons_range: [usize; 2],
    /// Half-open range of actions picked on a derivative job.
    pub use_buttons_range_recursive: [usize; 2],
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,
    /// Derivative levels below the root, at most two.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Remote service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GoApiConfig {
    #[serde(default = "default_process_mode")]
    pub process_mode: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Endpoint URLs keyed by `fetch`, `imagine` and the action names.
    pub urls: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_depth() -> usize {
    MAX_CHAIN_DEPTH
}

fn default_process_mode() -> String {
    "fast".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

impl EngineConfig {
    /// Resolve the config path from the environment and load it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    /// Load and validate a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tasks == 0 {
            return Err(invalid("max_tasks", "must be at least 1"));
        }
        if self.consumers == 0 {
            return Err(invalid("consumers", "must be at least 1"));
        }
        if self.task.prompts.is_empty() {
            return Err(invalid("task.prompts", "must not be empty"));
        }
        if !(1..=MAX_CHAIN_DEPTH).contains(&self.task.max_depth) {
            return Err(invalid(
                "task.max_depth",
                &format!("must be between 1 and {MAX_CHAIN_DEPTH}"),
            ));
        }
        check_range("task.use_buttons_range", self.task.use_buttons_range)?;
        check_range(
            "task.use_buttons_range_recursive",
            self.task.use_buttons_range_recursive,
        )?;
        for key in ["fetch", "imagine"] {
            if !self.goapi.urls.contains_key(key) {
                return Err(invalid(&format!("goapi.urls.{key}"), "is required"));
            }
        }
        Ok(())
    }

    pub fn producer_interval(&self) -> Duration {
        Duration::from_millis(self.producer_interval_ms)
    }
}

impl TaskConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn top_level_range(&self) -> Range<usize> {
        self.use_buttons_range[0]..self.use_buttons_range[1]
    }

    pub fn recursive_range(&self) -> Range<usize> {
        self.use_buttons_range_recursive[0]..self.use_buttons_range_recursive[1]
    }
}

impl GoApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

/// Read the API token from the environment.
pub fn token_from_env() -> Result<SecretString, ConfigError> {
    std::env::var(TOKEN_ENV)
        .map(SecretString::from)
        .map_err(|_| ConfigError::MissingEnvVar(TOKEN_ENV.to_string()))
}

fn check_range(key: &str, [lo, hi]: [usize; 2]) -> Result<(), ConfigError> {
    if lo == 0 || lo >= hi {
        return Err(invalid(key, &format!("expected 1 <= lo < hi, got [{lo}, {hi}]")));
    }
    Ok(())
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
max_tasks: 5
consumers: 3
task:
  ar: "16:9"
  prompts: ["a lighthouse at dusk"]
  use_buttons_range: [1, 3]
  use_buttons_range_recursive: [1, 2]
goapi:
  urls:
    fetch: https://api.example.com/fetch
    imagine: https://api.example.com/imagine
    upscale: https://api.example.com/upscale
"#;

    #[test]
    fn parses_with_defaults() {
        let config = EngineConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.max_tasks, 5);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.task.max_depth, 2);
        assert_eq!(config.task.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.task.top_level_range(), 1..3);
        assert_eq!(config.goapi.retry_attempts, 3);
        assert_eq!(config.goapi.process_mode, "fast");
    }

    #[test]
    fn rejects_empty_range() {
        let raw = SAMPLE.replace("[1, 3]", "[3, 3]");
        let err = EngineConfig::from_yaml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "task.use_buttons_range"));
    }

    #[test]
    fn rejects_depth_beyond_two_levels() {
        let raw = SAMPLE.replace("  ar: \"16:9\"\n", "  ar: \"16:9\"\n  max_depth: 3\n");
        let err = EngineConfig::from_yaml(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "task.max_depth"));

        let raw = SAMPLE.replace("  ar: \"16:9\"\n", "  ar: \"16:9\"\n  max_depth: 1\n");
        assert_eq!(EngineConfig::from_yaml(&raw).unwrap().task.max_depth, 1);
    }

    #[test]
    fn rejects_zero_max_tasks() {
        let raw = SAMPLE.replace("max_tasks: 5", "max_tasks: 0");
        assert!(EngineConfig::from_yaml(&raw).is_err());
    }

    #[test]
    fn requires_fetch_url() {
        let raw = SAMPLE.replace("    fetch: https://api.example.com/fetch\n", "");
        let err = EngineConfig::from_yaml(&raw).unwrap_err();
        assert!(err.to_string().contains("goapi.urls.fetch"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.consumers, 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
