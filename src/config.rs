//! Apply settings
//!
//! Loaded from `~/.config/tfapply/config.toml` when present. Every field has
//! a default, so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::lock::LockRetry;

/// Errors reading or writing the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Home directory could not be determined
    #[error("could not determine home directory")]
    NoHome,

    /// Could not read or write the file
    #[error("config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML or wrong shape
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHome)?;
    Ok(home.join(".config").join("tfapply"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Path named in the reminder printed after a successful apply
    pub state_out_path: PathBuf,

    /// Directory `errored.tfstate` is written to when the backend fails
    pub backup_dir: PathBuf,

    /// Waiting for a held state lock
    pub lock_retry: LockRetryConfig,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            state_out_path: PathBuf::from("terraform.tfstate"),
            backup_dir: PathBuf::from("."),
            lock_retry: LockRetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockRetryConfig {
    /// Values below `lock::MIN_RETRY_DELAY` are raised to it
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 16000,
        }
    }
}

impl ApplyConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `<config_dir>/config.toml`, or defaults if it doesn't exist
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let path = config_dir()?.join("config.toml");
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)
    }

    /// Lock waiting delays
    pub fn lock_retry(&self) -> LockRetry {
        LockRetry {
            initial_delay: Duration::from_millis(self.lock_retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.lock_retry.max_delay_ms),
        }
    }
}
