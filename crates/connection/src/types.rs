//! Public types for the connection core.

use std::fmt;
use std::time::Duration;

use kulucka_protocol::{Endpoint, NetworkMode};
use serde::{Deserialize, Serialize};

use crate::error::ModeTransitionError;

/// Bounded exponential backoff policy for reconnection polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryBudget {
    /// Total verification attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure.
    #[serde(with = "duration_ms", rename = "baseDelayMs")]
    pub base_delay: Duration,
    /// Backoff cap.
    #[serde(with = "duration_ms", rename = "maxDelayMs")]
    pub max_delay: Duration,
    /// Wait before the first attempt, seeded from the device's estimate.
    #[serde(with = "duration_ms", rename = "initialDelayMs")]
    pub initial_delay: Duration,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            initial_delay: Duration::ZERO,
        }
    }
}

impl RetryBudget {
    /// Creates a budget with no initial delay.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            initial_delay: Duration::ZERO,
        }
    }

    /// One attempt, no waiting.
    pub fn single() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after failed attempt `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Returns a copy whose first attempt waits for the device's estimate.
    ///
    /// The hint is capped at four times `max_delay` so a bogus estimate
    /// cannot stall the transition.
    pub fn seeded(&self, estimate: Option<Duration>) -> Self {
        let initial_delay = estimate
            .map(|d| d.min(self.max_delay.saturating_mul(4)))
            .unwrap_or(self.initial_delay);
        Self {
            initial_delay,
            ..self.clone()
        }
    }

    /// Upper bound of the time spent sleeping across all attempts.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| self.delay_for_attempt(i))
            .fold(self.initial_delay, Duration::saturating_add)
    }
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Phase of a mode transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStatus {
    Idle,
    SwitchRequested,
    Verifying,
    Succeeded,
    Failed,
}

impl TransitionStatus {
    /// True while a transition owns the device.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            TransitionStatus::SwitchRequested | TransitionStatus::Verifying
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransitionStatus::Succeeded | TransitionStatus::Failed)
    }
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionStatus::Idle => "idle",
            TransitionStatus::SwitchRequested => "switch_requested",
            TransitionStatus::Verifying => "verifying",
            TransitionStatus::Succeeded => "succeeded",
            TransitionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What started a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// AP/Station switch requested from the device.
    Switch,
    /// Re-confirming the current endpoint without asking the device to move.
    Reconnect,
    /// Broadcast discovery only.
    Discover,
}

/// Progress record of one transition. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub kind: TransitionKind,
    pub from_mode: NetworkMode,
    pub to_mode: NetworkMode,
    pub status: TransitionStatus,
    /// Failed verification attempts so far.
    pub attempt: u32,
    pub last_error: Option<String>,
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum TransitionEvent {
    /// The in-flight transition moved to a new phase.
    StatusChanged {
        kind: TransitionKind,
        status: TransitionStatus,
    },
    /// A verification attempt failed; `next_retry` is `None` after the last one.
    AttemptFailed {
        attempt: u32,
        error: String,
        next_retry: Option<Duration>,
    },
    /// Terminal outcome of a transition.
    Finished(Result<Endpoint, ModeTransitionError>),
}
