//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, request timeout, session monitor and activity timings, and the
//! last email used to log in.
//!
//! Configuration is stored at `~/.config/sqlcoach/config.json`. The
//! `SQLCOACH_API_URL` environment variable overrides the stored base URL.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
const APP_NAME: &str = "sqlcoach";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding `api_base_url`
pub const API_URL_ENV: &str = "SQLCOACH_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// 30s allows for slow query execution responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Token checks every 5 minutes land well inside the backend's refresh window.
const DEFAULT_SESSION_CHECK_INTERVAL_SECS: u64 = 300;

const DEFAULT_ACTIVITY_WINDOW_SECS: u64 = 600;

const DEFAULT_EXPIRY_WARNING_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub session_check_interval_secs: u64,
    pub activity_window_secs: u64,
    pub expiry_warning_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            session_check_interval_secs: DEFAULT_SESSION_CHECK_INTERVAL_SECS,
            activity_window_secs: DEFAULT_ACTIVITY_WINDOW_SECS,
            expiry_warning_secs: DEFAULT_EXPIRY_WARNING_SECS,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the durable session store and logs
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Base URL: environment first, then the config file, then the default
    pub fn api_base_url(&self) -> String {
        std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_check_interval(&self) -> Duration {
        Duration::from_secs(self.session_check_interval_secs.max(1))
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }

    pub fn expiry_warning(&self) -> Duration {
        Duration::from_secs(self.expiry_warning_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"last_email":"ada@example.com"}"#).unwrap();
        assert_eq!(config.last_email.as_deref(), Some("ada@example.com"));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_check_interval(), Duration::from_secs(300));
        assert_eq!(config.activity_window(), Duration::from_secs(600));
    }

    #[test]
    fn test_zero_check_interval_is_clamped() {
        let config = Config {
            session_check_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.session_check_interval(), Duration::from_secs(1));
    }
}
