//! CLI configuration file and registry resolution.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use unfurl_core::{EngineConfig, FieldRegistry};

pub const BASE_URL_ENV: &str = "UNFURL_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Registry used when neither the command line nor the config file names
/// one: the fields of a generated story episode.
pub const DEFAULT_REGISTRY: &str = r#"
- path: title
  render: heading
  order: 0
- path: episode
  render: number
  order: 1
- path: episodeNumber
  render: number
  order: 1
- path: summary
  render: text
  order: 2
- path: "characters[*].name"
  render: text
  group: "character-{0}"
  order: 3
- path: "characters[*].description"
  render: text
  group: "character-{0}"
  order: 4
- path: "characters[*]"
  render: character
  container: list_item
  group: "character-{0}"
  order: 5
  key_field: name
- path: "scenes[*]"
  render: scene
  container: list_item
  group: "scene-{0}"
  order: 10
- path: content
  render: markdown
  order: 20
- path: body
  render: markdown
  order: 20
- path: wordCount
  render: number
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub base_url: String,
    pub stream_path: String,
    pub snapshot_path: String,
    pub bearer_token: Option<String>,
    pub registry: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: unfurl_providers::http::DEFAULT_STREAM_PATH.to_string(),
            snapshot_path: unfurl_providers::http::DEFAULT_SNAPSHOT_PATH.to_string(),
            bearer_token: None,
            registry: None,
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load `explicit` if given, else the user config file if it exists,
    /// else defaults. Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        if !config.stream_path.contains("{job_id}") || !config.snapshot_path.contains("{job_id}") {
            anyhow::bail!("stream_path and snapshot_path must contain {{job_id}}");
        }
        // Re-run engine validation on the nested block.
        let engine = serde_yaml::to_string(&config.engine)?;
        EngineConfig::from_yaml_str(&engine)?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("{} overrides base_url", BASE_URL_ENV);
            self.base_url = base_url;
        }
        self
    }

    /// Registry from `explicit`, else the configured file, else the built-in
    /// table.
    pub fn load_registry(&self, explicit: Option<&Path>) -> Result<FieldRegistry> {
        match explicit.or(self.registry.as_deref()) {
            Some(path) => FieldRegistry::load(path)
                .with_context(|| format!("failed to load registry {}", path.display())),
            None => Ok(FieldRegistry::from_yaml_str(DEFAULT_REGISTRY)?),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("unfurl").join("config.yaml"))
}
