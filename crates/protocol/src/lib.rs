pub mod constants;
pub mod discovery;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use discovery::{DatagramError, DiscoveryResponse, discovery_probe, parse_discovery_response};
pub use messages::{DeviceStatus, ModeChangeRequest, ModeChangeResponse, WifiCredentials};
pub use types::{Endpoint, EndpointError, NetworkMode};
