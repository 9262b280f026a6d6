//! Viewer configuration.
//!
//! Values are resolved in layers: built-in defaults, then the JSON file at
//! `~/.config/iview/config.json` (or the path named by `IVIEW_CONFIG_PATH`),
//! then the `IVIEW_API_BASE` environment variable. Command-line flags are
//! applied last by the caller.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable allowing callers to override the configuration file path.
pub const CONFIG_PATH_ENV: &str = "IVIEW_CONFIG_PATH";

/// Environment variable overriding the backend API root.
pub const API_BASE_ENV: &str = "IVIEW_API_BASE";

pub const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_API_BASE: &str = "http://localhost:8080/api/v1/interactive";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// Settings for one viewer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ViewerConfig {
    /// Root of the interactive API, e.g. `http://localhost:8080/api/v1/interactive`.
    pub api_base: String,
    /// Permit plain http for non-loopback hosts.
    pub allow_insecure: bool,
    pub request_timeout_secs: u64,
    /// Delay between two status polls of the same node.
    pub poll_interval_ms: u64,
    /// Give up polling a node after this long; zero polls until terminal.
    pub poll_timeout_secs: u64,
    /// Fetch children down the auto-selected chain after loading.
    pub auto_expand: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            allow_insecure: false,
            request_timeout_secs: 30,
            poll_interval_ms: 1_000,
            poll_timeout_secs: 0,
            auto_expand: true,
        }
    }
}

impl ViewerConfig {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from_path(&default_config_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(data) => {
                let config: ViewerConfig = serde_json::from_str(&data)?;
                debug!(path = %path.display(), "loaded viewer config");
                Ok(config)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(ConfigError::Io(error)),
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(api_base) = env::var(API_BASE_ENV)
            && !api_base.trim().is_empty()
        {
            self.api_base = api_base.trim().to_string();
        }
    }

    /// Range checks only; URL rules are enforced by the API client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "apiBase must not be empty".into(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "pollIntervalMs must be greater than zero".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "requestTimeoutSecs must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        (self.poll_timeout_secs > 0).then(|| Duration::from_secs(self.poll_timeout_secs))
    }
}

/// Path of the configuration file, honouring `IVIEW_CONFIG_PATH`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("iview")
        .join(CONFIG_FILE_NAME)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if trimmed == "~" {
        return home();
    }
    match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
        Some(rest) => home().join(rest),
        None => PathBuf::from(trimmed),
    }
}
