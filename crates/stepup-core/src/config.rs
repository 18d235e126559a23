//! Updater configuration (`stepup.toml`).
//!
//! ```toml
//! update_url = "https://updates.example.com/myapp"
//! timeout_secs = 60
//! allow_insecure = false
//! keep_backup = true
//!
//! [launch]
//! program = "MyApp"
//! args = ["--fullscreen"]
//! ```
//!
//! The file is optional. `STEPUP_UPDATE_URL` overrides `update_url`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding `update_url`.
pub const UPDATE_URL_ENV: &str = "STEPUP_UPDATE_URL";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No update_url configured (set it in stepup.toml or {UPDATE_URL_ENV})")]
    MissingUpdateUrl,
}

/// The application the launcher starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchConfig {
    /// Program path, relative to the installation directory unless absolute.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdaterConfig {
    /// Base URL of the release repository (per-platform subdirectories).
    #[serde(default)]
    pub update_url: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Accept plain `http://` URLs. Meant for local mirrors and tests.
    #[serde(default)]
    pub allow_insecure: bool,

    /// Keep `prior/` after a successful update.
    #[serde(default = "default_true")]
    pub keep_backup: bool,

    #[serde(default)]
    pub launch: Option<LaunchConfig>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            update_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            allow_insecure: false,
            keep_backup: true,
            launch: None,
        }
    }
}

impl UpdaterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load `path`, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load `path` and apply environment overrides.
    pub fn resolve(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        Ok(config.with_update_url_override(std::env::var(UPDATE_URL_ENV).ok()))
    }

    /// Replace `update_url` when an override is present.
    pub fn with_update_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.update_url = Some(url);
        }
        self
    }

    pub fn update_url(&self) -> Result<&str, ConfigError> {
        self.update_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingUpdateUrl)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
