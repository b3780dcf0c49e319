//! Connection core for the incubator remote control.
//!
//! Keeps the device endpoint every HTTP call reads from, confirms where the
//! device went after it changes WiFi mode, and drives AP/Station switches
//! end to end with a single terminal outcome.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod poller;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::LinkConfig;
pub use coordinator::{ModeTransitionCoordinator, TransitionHandle, TransitionSettings};
pub use error::{ConfigError, ModeTransitionError, RegistryError, SetupError, VerificationError};
pub use poller::{AttemptFailure, ReconnectionPoller};
pub use registry::{EndpointRegistry, RegistrySnapshot};
pub use types::{ModeTransition, RetryBudget, TransitionEvent, TransitionKind, TransitionStatus};
