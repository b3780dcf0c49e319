//! Bounded reconnection polling.
//!
//! After the device has been told to change networks, [`ReconnectionPoller`]
//! asks it for its status at a candidate address until it answers, backing
//! off exponentially between attempts. The number of attempts is always
//! bounded by the [`RetryBudget`].

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use kulucka_device::{DeviceApi, DeviceError};
use kulucka_discovery::HostResolver;
use kulucka_protocol::constants::{AP_DEFAULT_HOST, DEVICE_HOSTNAME};
use kulucka_protocol::{DeviceStatus, Endpoint, NetworkMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::VerificationError;
use crate::types::RetryBudget;

/// A failed verification attempt, reported while polling continues.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// 1-based attempt number.
    pub attempt: u32,
    pub error: String,
    /// Backoff before the next attempt; `None` after the last one.
    pub next_delay: Option<Duration>,
}

/// Result of a single status check.
enum Check {
    Confirmed(Endpoint),
    /// Nothing useful answered yet; worth another attempt.
    Retry(String),
    /// Something answered and it is not our device.
    Rejected(String),
    Cancelled,
}

/// Confirms that the device answers at a candidate endpoint.
pub struct ReconnectionPoller {
    device: Arc<dyn DeviceApi>,
    resolver: Option<Arc<dyn HostResolver>>,
    ap_host: String,
    hostname: String,
    expected_device_id: Option<String>,
}

impl ReconnectionPoller {
    /// Creates a poller without hostname fallback.
    pub fn new(device: Arc<dyn DeviceApi>) -> Self {
        Self {
            device,
            resolver: None,
            ap_host: AP_DEFAULT_HOST.to_string(),
            hostname: DEVICE_HOSTNAME.to_string(),
            expected_device_id: None,
        }
    }

    /// Enables resolving the device hostname when the AP address stays silent.
    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the literal AP address that triggers the hostname fallback.
    pub fn with_ap_host(mut self, host: impl Into<String>) -> Self {
        self.ap_host = host.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// True when a silent AP address is followed by a hostname lookup.
    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    /// Rejects devices reporting a different id.
    pub fn with_expected_device_id(mut self, id: Option<String>) -> Self {
        self.expected_device_id = id.filter(|id| !id.is_empty());
        self
    }

    /// Polls `candidate` until the device answers or the budget runs out.
    pub async fn verify(
        &self,
        candidate: &Endpoint,
        budget: &RetryBudget,
        cancel: &CancellationToken,
    ) -> Result<Endpoint, VerificationError> {
        self.verify_with(candidate, budget, cancel, |_| {}).await
    }

    /// Like [`verify`](Self::verify), calling `on_failure` after every failed
    /// attempt.
    ///
    /// The confirmed endpoint keeps the candidate's host and port and takes
    /// its mode from the device's answer. A candidate with a known mode only
    /// counts as confirmed once the device reports that mode.
    pub async fn verify_with<F>(
        &self,
        candidate: &Endpoint,
        budget: &RetryBudget,
        cancel: &CancellationToken,
        mut on_failure: F,
    ) -> Result<Endpoint, VerificationError>
    where
        F: FnMut(&AttemptFailure) + Send,
    {
        let attempts = budget.max_attempts.max(1);
        if !budget.initial_delay.is_zero() {
            debug!(
                candidate = %candidate,
                delay_ms = budget.initial_delay.as_millis() as u64,
                "waiting for device to reconfigure"
            );
            sleep_or_cancel(budget.initial_delay, cancel).await?;
        }

        let mut last_error = None;
        for index in 0..attempts {
            match self.check(candidate, cancel).await {
                Check::Confirmed(endpoint) => {
                    info!(endpoint = %endpoint, attempt = index + 1, "device confirmed");
                    return Ok(endpoint);
                }
                Check::Cancelled => return Err(VerificationError::Cancelled),
                Check::Rejected(reason) => {
                    warn!(host = %candidate.host, %reason, "device rejected verification");
                    return Err(VerificationError::DeviceRejected {
                        host: candidate.host.clone(),
                        reason,
                    });
                }
                Check::Retry(reason) => {
                    let next_delay =
                        (index + 1 < attempts).then(|| budget.delay_for_attempt(index));
                    debug!(
                        candidate = %candidate,
                        attempt = index + 1,
                        max_attempts = attempts,
                        error = %reason,
                        next_delay_ms = next_delay.map(|d| d.as_millis() as u64),
                        "verification attempt failed"
                    );
                    on_failure(&AttemptFailure {
                        attempt: index + 1,
                        error: reason.clone(),
                        next_delay,
                    });
                    last_error = Some(reason);
                    if let Some(delay) = next_delay {
                        sleep_or_cancel(delay, cancel).await?;
                    }
                }
            }
        }

        if let Some(endpoint) = self
            .hostname_fallback(candidate, attempts, &mut last_error, &mut on_failure, cancel)
            .await?
        {
            return Ok(endpoint);
        }

        warn!(candidate = %candidate, attempts, "device not confirmed");
        Err(VerificationError::Exhausted {
            attempts,
            last_error,
        })
    }

    /// One attempt against the hostname's address when the AP literal failed.
    async fn hostname_fallback<F>(
        &self,
        candidate: &Endpoint,
        attempts: u32,
        last_error: &mut Option<String>,
        on_failure: &mut F,
        cancel: &CancellationToken,
    ) -> Result<Option<Endpoint>, VerificationError>
    where
        F: FnMut(&AttemptFailure) + Send,
    {
        let Some(resolver) = &self.resolver else {
            return Ok(None);
        };
        if candidate.host != self.ap_host {
            return Ok(None);
        }

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VerificationError::Cancelled),
            addr = resolver.resolve(&self.hostname) => addr,
        };
        let Some(IpAddr::V4(addr)) = resolved else {
            debug!(hostname = %self.hostname, "hostname did not resolve");
            return Ok(None);
        };

        let fallback = Endpoint {
            host: addr.to_string(),
            port: candidate.port,
            mode: NetworkMode::Unknown,
        };
        info!(hostname = %self.hostname, %addr, "trying resolved hostname");

        match self.check(&fallback, cancel).await {
            Check::Confirmed(endpoint) => {
                info!(endpoint = %endpoint, "device confirmed via hostname");
                Ok(Some(endpoint))
            }
            Check::Cancelled => Err(VerificationError::Cancelled),
            Check::Retry(reason) | Check::Rejected(reason) => {
                on_failure(&AttemptFailure {
                    attempt: attempts + 1,
                    error: reason.clone(),
                    next_delay: None,
                });
                *last_error = Some(reason);
                Ok(None)
            }
        }
    }

    async fn check(&self, candidate: &Endpoint, cancel: &CancellationToken) -> Check {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Check::Cancelled,
            r = self.device.fetch_status(candidate) => r,
        };
        match result {
            Ok(status) => self.judge(candidate, status),
            Err(e) if e.is_unreachable() => Check::Retry(e.to_string()),
            // The firmware answers 5xx while its web server restarts.
            Err(e @ DeviceError::Status { status, .. }) if status >= 500 => {
                Check::Retry(e.to_string())
            }
            Err(e) => Check::Rejected(e.to_string()),
        }
    }

    fn judge(&self, candidate: &Endpoint, status: DeviceStatus) -> Check {
        if let (Some(expected), Some(actual)) = (&self.expected_device_id, &status.device_id)
            && expected != actual
        {
            return Check::Rejected(format!("device id {actual} does not match {expected}"));
        }
        if candidate.mode != NetworkMode::Unknown && status.mode != candidate.mode {
            return Check::Retry(format!(
                "device reports {} mode, expected {}",
                status.mode, candidate.mode
            ));
        }
        Check::Confirmed(Endpoint {
            host: candidate.host.clone(),
            port: candidate.port,
            mode: status.mode,
        })
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), VerificationError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VerificationError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
