//! Configuration management for Archivist.
//!
//! Configuration is loaded from a TOML file with sensible defaults. The
//! orchestrator takes one read-only snapshot (`Arc<Config>`) before the queue
//! starts; nothing mutates it mid-run.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for Archivist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories
    pub general: GeneralConfig,

    /// External tool resolution
    pub tools: ToolsConfig,

    /// Password probing
    pub extract: ExtractConfig,

    /// Output archive settings
    pub archive: ArchiveConfig,

    /// Image recompression
    pub image: ImageConfig,

    /// Title and file naming
    pub naming: NamingConfig,

    /// Remote submission
    pub api: ApiConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/rs.archivist.archivist/config.toml
    /// - Linux: ~/.config/archivist/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\archivist\config\config.toml
    ///
    /// Falls back to ~/.archivist/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("rs", "archivist", "archivist")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".archivist").join("config.toml")
            })
    }

    /// Resolved output directory (with ~ expansion).
    pub fn output_dir(&self) -> PathBuf {
        expand(&self.general.output_dir)
    }

    /// Resolved scratch directory (with ~ expansion).
    pub fn temp_dir(&self) -> PathBuf {
        expand(&self.general.temp_dir)
    }

    /// Resolved log directory (with ~ expansion).
    pub fn log_dir(&self) -> PathBuf {
        expand(&self.general.log_dir)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}

/// Resolve `${ENV_VAR}` references in config strings.
///
/// Plain values pass through; empty values and unset variables yield `None`.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok()
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
