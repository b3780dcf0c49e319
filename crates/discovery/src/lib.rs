pub mod client;
pub mod interfaces;
pub mod resolver;
pub mod types;

// Re-export primary types.
pub use client::{BroadcastDiscoverer, Discoverer};
pub use interfaces::{interface_broadcast_addrs, mdns_hostname};
pub use kulucka_protocol::DiscoveryResponse;
pub use resolver::{FallbackResolver, HostResolver, MdnsResolver, SystemResolver};
pub use types::DiscoveryConfig;

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no device answered the discovery probe")]
    NoResponse,

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("discovery cancelled")]
    Cancelled,

    #[error("discovery timeout must be greater than zero")]
    InvalidTimeout,
}

impl DiscoveryError {
    /// Whether running discovery again could plausibly succeed.
    ///
    /// A silent network is worth another try; a socket that cannot bind or
    /// send will fail the same way next time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiscoveryError::NoResponse)
    }
}
