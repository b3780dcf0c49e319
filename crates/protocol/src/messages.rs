use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::NetworkMode;

/// Router credentials handed to the device when it should join a network.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /api/wifi/mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChangeRequest {
    pub mode: NetworkMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ModeChangeRequest {
    pub fn new(mode: NetworkMode, credentials: Option<&WifiCredentials>) -> Self {
        Self {
            mode,
            ssid: credentials.map(|c| c.ssid.clone()),
            password: credentials.map(|c| c.password.clone()),
        }
    }
}

/// Acknowledgement of a mode-change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeChangeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Address the device expects to have after switching, when it knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_ip: Option<String>,
    /// Seconds the device expects the switch to take.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<u64>,
}

impl ModeChangeResponse {
    /// Returns the estimated switch duration, ignoring a zero hint.
    pub fn estimated_delay(&self) -> Option<Duration> {
        self.estimated_time
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Returns the new-IP hint if it is non-empty.
    pub fn new_ip_hint(&self) -> Option<&str> {
        self.new_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty() && *ip != "0.0.0.0")
    }
}

/// Body of `GET /api/wifi/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub mode: NetworkMode,
    #[serde(default)]
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default)]
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}
