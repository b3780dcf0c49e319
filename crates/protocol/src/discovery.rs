//! UDP discovery datagram format.
//!
//! The probe is the bare ASCII string [`DISCOVERY_REQUEST`]. The device
//! answers with `KULUCKA_DEVICE:<deviceId>:<port>`; the host to talk to is
//! the source address of that datagram, never a payload field.

use std::net::IpAddr;

use crate::constants::{DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX};
use crate::types::{Endpoint, NetworkMode};

/// Reasons a datagram is not a discovery reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("payload is not UTF-8")]
    NotUtf8,

    #[error("foreign payload")]
    ForeignPrefix,

    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// A device that answered the discovery probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub source_address: IpAddr,
    pub device_id: String,
    pub port: u16,
}

impl DiscoveryResponse {
    /// Endpoint for the discovered device. The mode is not part of the
    /// reply, so it stays unknown until a status request confirms it.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.source_address.to_string(),
            port: self.port,
            mode: NetworkMode::Unknown,
        }
    }
}

/// Returns the probe payload.
pub fn discovery_probe() -> &'static [u8] {
    DISCOVERY_REQUEST.as_bytes()
}

/// Parses a reply datagram received from `source`.
pub fn parse_discovery_response(
    payload: &[u8],
    source: IpAddr,
) -> Result<DiscoveryResponse, DatagramError> {
    let text = std::str::from_utf8(payload).map_err(|_| DatagramError::NotUtf8)?;
    // Firmware pads with NUL or a trailing newline depending on version.
    let text = text.trim_end_matches(|c: char| c == '\0' || c.is_ascii_whitespace());

    let rest = text
        .strip_prefix(DISCOVERY_RESPONSE_PREFIX)
        .ok_or(DatagramError::ForeignPrefix)?;

    let (device_id, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| DatagramError::Malformed(format!("missing port in {rest:?}")))?;

    if device_id.is_empty() {
        return Err(DatagramError::Malformed("empty device id".into()));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| DatagramError::Malformed(format!("invalid port {port:?}")))?;
    if port == 0 {
        return Err(DatagramError::Malformed("port 0".into()));
    }

    Ok(DiscoveryResponse {
        source_address: source,
        device_id: device_id.to_string(),
        port,
    })
}
