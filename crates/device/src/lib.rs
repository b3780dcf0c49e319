//! HTTP surface of the incubator firmware used by the reconnection core.
//!
//! Only the two endpoints that matter while the device changes networks
//! live here: the WiFi mode switch and the lightweight status probe.

pub mod client;
pub mod error;

pub use client::{DEFAULT_REQUEST_TIMEOUT, DeviceApi, HttpDeviceClient};
pub use error::DeviceError;
