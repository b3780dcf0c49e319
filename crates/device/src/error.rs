//! Error types for device HTTP calls.

/// Errors produced while talking to the firmware.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("device error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceError {
    /// Converts a transport error, keeping timeouts distinguishable.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeviceError::Timeout
        } else {
            DeviceError::Http(e)
        }
    }

    /// True when nothing answered: refused, unroutable or timed out.
    ///
    /// Anything else means some HTTP server replied at that address.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DeviceError::Http(_) | DeviceError::Timeout)
    }
}
