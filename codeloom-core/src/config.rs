//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/codeloom/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/codeloom/` (~/.config/codeloom/)
//! - Data: `$XDG_DATA_HOME/codeloom/` (~/.local/share/codeloom/)
//! - State/Logs: `$XDG_STATE_HOME/codeloom/` (~/.local/state/codeloom/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stream ingestion configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Snapshot sync configuration
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Stream ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Bytes requested per read from the transport
    #[serde(default = "default_read_size")]
    pub read_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_size: default_read_size(),
        }
    }
}

fn default_read_size() -> usize {
    4096
}

/// How delete conflicts are stamped before merging.
///
/// `Manual` leaves them for the caller; the other variants pick a
/// resolution up front so every sync converges.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteConflictPolicy {
    #[default]
    Manual,
    /// Resurrect the edited side under a new id
    KeepBoth,
    PreferLocal,
    PreferRemote,
}

/// Snapshot sync configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Identity stamped on every change this device produces
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Directory used as the shared remote snapshot store
    pub remote_dir: Option<PathBuf>,

    /// Default resolution for delete conflicts
    #[serde(default)]
    pub delete_conflicts: DeleteConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            remote_dir: None,
            delete_conflicts: DeleteConflictPolicy::default(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

impl SyncConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::Config("sync.user_id must not be empty".to_string()));
        }
        if let Some(dir) = &self.remote_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config(
                    "sync.remote_dir must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        if self.stream.read_size == 0 {
            return Err(Error::Config(
                "stream.read_size must be greater than 0".to_string(),
            ));
        }
        self.sync.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/codeloom/config.toml` (~/.config/codeloom/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("codeloom").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("codeloom")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("codeloom")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/codeloom/data.db` (~/.local/share/codeloom/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("codeloom.log")
    }
}
