//! Engine configuration, loadable from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 30;
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_THINKING_START: &str = "<think>";
pub const DEFAULT_THINKING_END: &str = "</think>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the thinking phase shows up in the session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Status stays `streaming`; thinking is reported through a separate flag.
    #[default]
    Flag,
    /// Status switches to `thinking` while the phase is open.
    Exclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    pub start_marker: String,
    pub end_marker: String,
    pub mode: ThinkingMode,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            start_marker: DEFAULT_THINKING_START.to_string(),
            end_marker: DEFAULT_THINKING_END.to_string(),
            mode: ThinkingMode::Flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between a content change and the parse that follows it.
    /// Zero parses on every delivery.
    pub coalesce_window_ms: u64,
    pub thinking: ThinkingConfig,
    /// Capacity of the per-session engine event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: DEFAULT_COALESCE_WINDOW_MS,
            thinking: ThinkingConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn with_coalesce_window(mut self, window: Duration) -> Self {
        self.coalesce_window_ms = window.as_millis() as u64;
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_file(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.thinking.start_marker.is_empty() || self.thinking.end_marker.is_empty() {
            return Err(ConfigError::Invalid(
                "thinking markers must not be empty".to_string(),
            ));
        }
        if self.thinking.start_marker == self.thinking.end_marker {
            return Err(ConfigError::Invalid(
                "thinking start and end markers must differ".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
