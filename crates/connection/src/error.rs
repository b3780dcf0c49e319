//! Error types for the connection core.

use kulucka_protocol::EndpointError;

/// Errors from the endpoint registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),
}

/// Why the reconnection poller could not confirm the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("device not confirmed after {attempts} attempt(s){}", last_error_suffix(.last_error))]
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("device at {host} rejected verification: {reason}")]
    DeviceRejected { host: String, reason: String },

    #[error("verification cancelled")]
    Cancelled,
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

/// Terminal failure of a mode transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeTransitionError {
    #[error("a mode transition is already in progress")]
    AlreadyInProgress,

    #[error("device refused mode change: {0}")]
    SwitchRejectedByDevice(String),

    #[error("mode change request failed: {0}")]
    SwitchRequestFailed(String),

    #[error("mode transition cancelled")]
    Cancelled,

    #[error("device not found ({verification}; discovery: {discovery})")]
    BothPathsExhausted {
        verification: String,
        discovery: String,
    },

    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("cannot switch to {0} mode")]
    InvalidTarget(kulucka_protocol::NetworkMode),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] EndpointError),

    /// The endpoint is in use but could not be written to disk. The next
    /// store retries the write.
    #[error("endpoint in use but not saved: {0}")]
    Registry(String),
}

impl ModeTransitionError {
    /// Short text for the UI layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            ModeTransitionError::AlreadyInProgress => "a network change is already in progress",
            ModeTransitionError::SwitchRejectedByDevice(_) => "device refused mode change",
            ModeTransitionError::SwitchRequestFailed(_) => "could not reach the device",
            ModeTransitionError::Cancelled => "cancelled",
            ModeTransitionError::BothPathsExhausted { .. }
            | ModeTransitionError::DiscoveryFailed(_) => "device not found, check network",
            ModeTransitionError::InvalidTarget(_) | ModeTransitionError::InvalidEndpoint(_) => {
                "invalid network settings"
            }
            ModeTransitionError::Registry(_) => "address in use but could not be saved",
        }
    }
}

/// Errors loading or saving the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors while wiring a coordinator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("HTTP client: {0}")]
    Device(#[from] kulucka_device::DeviceError),

    #[error("endpoint registry: {0}")]
    Registry(#[from] RegistryError),
}
