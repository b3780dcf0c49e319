use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::constants::{AP_DEFAULT_HOST, DEFAULT_HTTP_PORT};

/// WiFi mode of the incubator controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Device hosts its own access point at a fixed address.
    Ap,
    /// Device joined a router and got a DHCP address.
    Station,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Ap => write!(f, "ap"),
            NetworkMode::Station => write!(f, "station"),
            NetworkMode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Errors from endpoint validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("port must be set for {0} mode")]
    MissingPort(NetworkMode),
}

/// Believed network location of the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub mode: NetworkMode,
}

impl Endpoint {
    /// Creates a validated endpoint.
    pub fn new(host: impl Into<String>, port: u16, mode: NetworkMode) -> Result<Self, EndpointError> {
        let endpoint = Self {
            host: host.into().trim().to_string(),
            port,
            mode,
        };
        endpoint.validate()?;
        Ok(endpoint)
    }

    /// The well-known address of the device in AP mode.
    pub fn access_point() -> Self {
        Self {
            host: AP_DEFAULT_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            mode: NetworkMode::Ap,
        }
    }

    /// Checks the host/port invariants.
    ///
    /// The host is either an IPv4 literal or a hostname. A port of zero is
    /// only tolerated while the mode is unknown.
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        if !is_valid_host(&self.host) {
            return Err(EndpointError::InvalidHost(self.host.clone()));
        }
        if self.port == 0 && self.mode != NetworkMode::Unknown {
            return Err(EndpointError::MissingPort(self.mode));
        }
        Ok(())
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the HTTP base URL for the device.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }

    /// Returns the host as an IPv4 literal, if it is one.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.host.parse().ok()
    }

    /// Returns a copy with a different mode.
    pub fn with_mode(&self, mode: NetworkMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.mode)
    }
}

fn is_valid_host(host: &str) -> bool {
    // Dotted digits must be a real IPv4 literal, not a half-typed one.
    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return host.parse::<Ipv4Addr>().is_ok();
    }
    host.len() <= 253
        && !host.starts_with(['.', '-'])
        && host
            .split('.')
            .filter(|label| !label.is_empty())
            .all(|label| {
                label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
}
