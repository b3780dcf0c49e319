//! Link configuration.
//!
//! Stored as JSON at `<config dir>/kulucka/config.json`. Every field has a
//! default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kulucka_device::DEFAULT_REQUEST_TIMEOUT;
use kulucka_discovery::DiscoveryConfig;
use kulucka_discovery::types::DEFAULT_DISCOVERY_TIMEOUT;
use kulucka_protocol::constants::{AP_DEFAULT_HOST, DEFAULT_HTTP_PORT, DEVICE_HOSTNAME};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coordinator::TransitionSettings;
use crate::error::ConfigError;
use crate::types::RetryBudget;

const APP_DIR: &str = "kulucka";
const CONFIG_FILE: &str = "config.json";
const ENDPOINT_FILE: &str = "endpoint.json";

/// Settings for discovery, polling and the HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkConfig {
    pub discovery: DiscoveryConfig,
    pub discovery_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub retry: RetryBudget,
    /// Address the device uses in AP mode.
    pub ap_host: String,
    pub http_port: u16,
    /// Hostname the device announces in station mode.
    pub hostname: String,
    pub resolve_timeout_ms: u64,
    /// Only accept a device reporting this id, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_device_id: Option<String>,
    /// Overrides where the endpoint is persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_file: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            retry: RetryBudget::default(),
            ap_host: AP_DEFAULT_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            hostname: DEVICE_HOSTNAME.to_string(),
            resolve_timeout_ms: 3000,
            expected_device_id: None,
            endpoint_file: None,
        }
    }
}

impl LinkConfig {
    /// Loads the config file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Loads from [`default_path`](Self::default_path).
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `<config dir>/kulucka/config.json`, if a config dir is known.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Where the endpoint registry persists its value.
    pub fn endpoint_path(&self) -> PathBuf {
        self.endpoint_file
            .clone()
            .or_else(|| config_dir().map(|d| d.join(APP_DIR).join(ENDPOINT_FILE)))
            .unwrap_or_else(|| PathBuf::from(ENDPOINT_FILE))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn transition_settings(&self) -> TransitionSettings {
        TransitionSettings {
            budget: self.retry.clone(),
            discovery_timeout: self.discovery_timeout(),
            ap_host: self.ap_host.clone(),
            http_port: self.http_port,
            hostname: self.hostname.clone(),
        }
    }
}

/// Returns the platform config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
