//! Persistent settings
//!
//! Stored as TOML under the platform config directory. A missing or unreadable
//! file falls back to defaults so the shell can always start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::ExitCodePolicy;

/// Image started when a request does not name one
pub const DEFAULT_IMAGE: &str = "jupyter/base-notebook";

/// Host port published for a new kernel
pub const DEFAULT_PORT: u16 = 9999;

/// Container status filter used when listing kernels
pub const DEFAULT_STATUS_FILTER: &str = "running";

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Container runtime binary; looked up on PATH when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_path: Option<PathBuf>,
    pub default_image: String,
    pub default_port: u16,
    pub default_status_filter: String,
    pub exit_code_policy: ExitCodePolicy,
    /// Stream `docker run` output back instead of discarding it
    pub capture_start_output: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_path: None,
            default_image: DEFAULT_IMAGE.to_string(),
            default_port: DEFAULT_PORT,
            default_status_filter: DEFAULT_STATUS_FILTER.to_string(),
            exit_code_policy: ExitCodePolicy::default(),
            capture_start_output: false,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "kernel-shell")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Load settings from `path` (or the default location), falling back to
    /// defaults on any error
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => {
                tracing::warn!("No config directory, using default settings");
                return Self::default();
            }
        };

        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
