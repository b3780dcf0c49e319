//! Fixed values of the incubator firmware protocol.

/// UDP port the firmware listens on for discovery probes.
pub const DISCOVERY_PORT: u16 = 8266;

/// Payload of the discovery probe datagram.
pub const DISCOVERY_REQUEST: &str = "KULUCKA_DISCOVERY";

/// Prefix of a discovery reply: `KULUCKA_DEVICE:<deviceId>:<port>`.
pub const DISCOVERY_RESPONSE_PREFIX: &str = "KULUCKA_DEVICE:";

/// Largest discovery datagram we bother reading.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Address of the device while it hosts its own access point.
pub const AP_DEFAULT_HOST: &str = "192.168.4.1";

/// HTTP port served by the firmware unless discovery says otherwise.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// mDNS hostname announced by the firmware in station mode.
pub const DEVICE_HOSTNAME: &str = "kulucka.local";

/// Mode-change endpoint (`POST`).
pub const MODE_CHANGE_PATH: &str = "/api/wifi/mode";

/// Lightweight status endpoint (`GET`) used to confirm the device identity.
pub const STATUS_PATH: &str = "/api/wifi/status";
