//! Defaults file for the `simstore` tool.
//!
//! Settings are read from `~/.simstore/config.toml` unless another path is
//! given. A missing file means built-in defaults:
//!
//! ```toml
//! [export]
//! limit = 0          # rows per export, 0 = all
//!
//! [save]
//! compression = true # gzip the body when re-packing
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level defaults file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// `export` command defaults.
    pub export: ExportConfig,
    /// `repack` command defaults.
    pub save: SaveConfig,
}

/// Defaults for `export`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Maximum rows to export; `0` exports every record.
    pub limit: usize,
}

/// Defaults for writing snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    /// Gzip the snapshot body.
    pub compression: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self { compression: true }
    }
}

/// Get the default config directory path.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".simstore")
}

/// Get the default config file path.
#[must_use]
pub fn config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a specific path.
pub async fn load_config_from(path: &Path) -> ConfigResult<CliConfig> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(CliConfig::default());
    }

    let content = tokio::fs::read_to_string(path).await?;
    let config: CliConfig = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config file");

    Ok(config)
}

/// Render the effective configuration as TOML.
pub fn render_config(config: &CliConfig) -> ConfigResult<String> {
    Ok(toml::to_string_pretty(config)?)
}
