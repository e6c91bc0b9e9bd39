use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::limits::WorkflowDefaults;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from `~/.taskdeck/config.toml`.
///
/// Never stores API keys or tokens; credentials stay with the execution
/// invoker on the other side of the trait boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub workflow: WorkflowDefaults,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

impl Config {
    /// Load from the default path, falling back to defaults when the file
    /// does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save to the given path, creating parent directories as needed.
    pub fn save_to(&self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let text = self.to_toml()?;
        std::fs::write(&path, text).map_err(|e| ConfigError::Io(e.to_string()))?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Semantic validation beyond what the type system expresses.
    ///
    /// Non-positive WIP limits are NOT rejected here: the resolver treats
    /// them as invalid and falls through to the next tier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.tick_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "queue.tick_interval_secs must be at least 1".into(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskdeck")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between automation ticks for each workspace loop.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
        }
    }
}

/// Breaker tuning. Threshold and cooldown are configuration because
/// providers have wildly different retry-after semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_project_name() -> String {
    "taskdeck".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tick_interval() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}
