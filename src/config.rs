//! `refract.toml` loading.

use std::path::{Path, PathBuf};

use refract_reconciler::{LoopConfig, ReconcilerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_FILE: &str = "refract.toml";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Whole-process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefractConfig {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub controller: LoopConfig,
}

impl RefractConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for values that fail validation.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or [`DEFAULT_CONFIG_FILE`] when it exists, or defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when an explicitly given file cannot be
    /// read, plus any error of [`RefractConfig::from_toml`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text, &path)
    }

    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the section and setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconciler
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("[reconciler] {e}")))?;
        self.controller
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("[controller] {e}")))
    }
}
