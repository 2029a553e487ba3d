//! Reconflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconflowConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl ReconflowConfig {
    /// Load config from the default path (~/.reconflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Reconflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reconflow")
    }
}

/// Where workflows and the persisted store live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_workflows_dir() -> String { "~/.reconflow/workflows".into() }
fn default_db_path() -> String { "~/.reconflow/reconflow.db".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workflows_dir: default_workflows_dir(),
            db_path: default_db_path(),
        }
    }
}

/// Trigger scheduling and recovery tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max event log rows replayed by one recovery sweep.
    #[serde(default = "default_recovery_batch")]
    pub recovery_batch: usize,
    /// Pause between replayed rows.
    #[serde(default = "default_recovery_delay")]
    pub recovery_delay_ms: u64,
    /// Filesystem changes closer together than this fire a watch trigger once.
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce_ms: u64,
}

fn default_recovery_batch() -> usize { 100 }
fn default_recovery_delay() -> u64 { 100 }
fn default_watch_debounce() -> u64 { 500 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recovery_batch: default_recovery_batch(),
            recovery_delay_ms: default_recovery_delay(),
            watch_debounce_ms: default_watch_debounce(),
        }
    }
}

/// Step execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

fn default_shell() -> String { "sh".into() }
fn default_workspace_dir() -> String { "~/.reconflow/workspaces".into() }
fn default_step_timeout() -> u64 { 3600 }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            workspace_dir: default_workspace_dir(),
            step_timeout_secs: default_step_timeout(),
        }
    }
}
