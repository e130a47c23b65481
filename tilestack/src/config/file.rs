//! Configuration file handling.
//!
//! Loads a run configuration from an INI file. Settings structs live in
//! [`super::settings`], constants in [`super::defaults`], parsing in
//! [`super::parser`] and cross-section checks in [`super::validate`].

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use super::defaults::*;
pub use super::settings::*;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Config text is not valid INI
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ini::ParseError),

    /// Config file does not exist
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Required setting absent
    #[error("Missing configuration: {section}.{key}")]
    Missing { section: String, key: String },

    /// Two planned artifacts render to the same path
    #[error("Output path collision: {path} is produced by both {first} and {second}")]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },
}

impl ConfigFileError {
    pub(super) fn invalid(
        section: &str,
        key: &str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub(super) fn missing(section: &str, key: &str) -> Self {
        ConfigFileError::Missing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl ConfigFile {
    /// Load configuration from a specific path.
    ///
    /// Unlike settings of a long-running service there is nothing sensible
    /// to default a run to, so a missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Err(ConfigFileError::NotFound(path.to_path_buf()));
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content)?;
        super::parser::parse_ini(&ini)
    }
}

/// Get the path to the config directory (~/.tilestack).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilestack")
}

/// Get the path to the default config file (~/.tilestack/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
