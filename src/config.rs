//! Engine configuration, loadable from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::IndexError;

const CONFIG_DIR_NAME: &str = "content-indexer";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Name of the content source the engine indexes.
    pub source_name: String,
    /// Check workspace names against the source before creating index state.
    pub verify_workspaces: bool,
    /// Depth of each bounded subgraph read. Larger values mean fewer, bigger reads.
    pub max_depth_per_read: usize,
    pub read_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Optimize automatically once this many changes were committed since the last
    /// optimization. 0 disables automatic optimization.
    pub max_changes_before_optimize: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_name: "default".to_string(),
            verify_workspaces: true,
            max_depth_per_read: 10,
            read_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
            max_changes_before_optimize: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Load from `path` if given, else from the platform config dir, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), IndexError> {
        if self.max_depth_per_read == 0 {
            return Err(IndexError::InvalidArgument(
                "max_depth_per_read must be at least 1".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(IndexError::InvalidArgument("read_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// `<config dir>/content-indexer/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}
