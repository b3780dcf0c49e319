use std::net::Ipv4Addr;
use std::time::Duration;

use kulucka_protocol::constants::DISCOVERY_PORT;
use serde::{Deserialize, Serialize};

/// Default discovery listen window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(6);

/// Broadcast targets tried when nothing else is configured: the limited
/// broadcast address, the device's own AP subnet and the two subnets most
/// home routers hand out.
pub const DEFAULT_BROADCAST_ADDRS: [Ipv4Addr; 4] = [
    Ipv4Addr::BROADCAST,
    Ipv4Addr::new(192, 168, 4, 255),
    Ipv4Addr::new(192, 168, 1, 255),
    Ipv4Addr::new(192, 168, 0, 255),
];

/// Settings for [`BroadcastDiscoverer`](crate::BroadcastDiscoverer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// Broadcast addresses the probe is sent to.
    pub broadcast_addrs: Vec<Ipv4Addr>,
    /// Also probe the directed broadcast address of every local interface.
    pub include_interface_broadcasts: bool,
    /// Destination port of the probe.
    pub port: u16,
    /// Local address the probe socket binds to (ephemeral port).
    pub bind_ip: Ipv4Addr,
    /// Re-send the probe this often while listening; 0 sends it once.
    pub resend_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_addrs: DEFAULT_BROADCAST_ADDRS.to_vec(),
            include_interface_broadcasts: true,
            port: DISCOVERY_PORT,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            resend_interval_ms: 1000,
        }
    }
}

impl DiscoveryConfig {
    /// Returns the probe re-send interval, if enabled.
    pub fn resend_interval(&self) -> Option<Duration> {
        (self.resend_interval_ms > 0).then(|| Duration::from_millis(self.resend_interval_ms))
    }
}
