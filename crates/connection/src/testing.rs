//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use kulucka_device::{DeviceApi, DeviceError};
use kulucka_discovery::{Discoverer, DiscoveryError, HostResolver};
use kulucka_protocol::{
    DeviceStatus, DiscoveryResponse, Endpoint, ModeChangeRequest, ModeChangeResponse, NetworkMode,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type StatusScript = Box<dyn Fn(&Endpoint, u32) -> Result<DeviceStatus, DeviceError> + Send + Sync>;
type AckScript = Box<dyn Fn(&ModeChangeRequest) -> Result<ModeChangeResponse, DeviceError> + Send + Sync>;

/// Fake firmware. Status answers come from a closure that sees the target
/// endpoint and the 0-based index of the status call.
pub(crate) struct ScriptedDevice {
    status: StatusScript,
    ack: AckScript,
    status_latency: Duration,
    ack_latency: Duration,
    pub(crate) status_calls: Mutex<Vec<(String, Instant)>>,
    pub(crate) mode_requests: Mutex<Vec<(String, ModeChangeRequest)>>,
}

impl ScriptedDevice {
    /// Unreachable for status; accepts every mode change.
    pub(crate) fn new() -> Self {
        Self {
            status: Box::new(|_, _| Err(DeviceError::Timeout)),
            ack: Box::new(|_| Ok(ack(true))),
            status_latency: Duration::ZERO,
            ack_latency: Duration::ZERO,
            status_calls: Mutex::new(Vec::new()),
            mode_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_status(
        mut self,
        f: impl Fn(&Endpoint, u32) -> Result<DeviceStatus, DeviceError> + Send + Sync + 'static,
    ) -> Self {
        self.status = Box::new(f);
        self
    }

    pub(crate) fn with_ack(
        mut self,
        f: impl Fn(&ModeChangeRequest) -> Result<ModeChangeResponse, DeviceError> + Send + Sync + 'static,
    ) -> Self {
        self.ack = Box::new(f);
        self
    }

    /// Makes every status call take `latency` before answering.
    pub(crate) fn with_status_latency(mut self, latency: Duration) -> Self {
        self.status_latency = latency;
        self
    }

    /// Makes the mode change request take `latency` before the ack.
    pub(crate) fn with_ack_latency(mut self, latency: Duration) -> Self {
        self.ack_latency = latency;
        self
    }

    pub(crate) fn status_hosts(&self) -> Vec<String> {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(host, _)| host.clone())
            .collect()
    }

    pub(crate) fn status_times(&self) -> Vec<Instant> {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }
}

impl DeviceApi for ScriptedDevice {
    fn request_mode_change<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        request: &'a ModeChangeRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ModeChangeResponse, DeviceError>> + Send + 'a>> {
        self.mode_requests
            .lock()
            .unwrap()
            .push((endpoint.host.clone(), request.clone()));
        let result = (self.ack)(request);
        Box::pin(async move {
            if !self.ack_latency.is_zero() {
                tokio::time::sleep(self.ack_latency).await;
            }
            result
        })
    }

    fn fetch_status<'a>(
        &'a self,
        endpoint: &'a Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<DeviceStatus, DeviceError>> + Send + 'a>> {
        let index = {
            let mut calls = self.status_calls.lock().unwrap();
            calls.push((endpoint.host.clone(), Instant::now()));
            (calls.len() - 1) as u32
        };
        Box::pin(async move {
            if !self.status_latency.is_zero() {
                tokio::time::sleep(self.status_latency).await;
            }
            (self.status)(endpoint, index)
        })
    }
}

pub(crate) fn status(mode: NetworkMode, ip: &str) -> DeviceStatus {
    DeviceStatus {
        mode,
        ip: ip.to_string(),
        ssid: None,
        connected: true,
        rssi: None,
        device_id: Some("esp32-incubator".into()),
    }
}

pub(crate) fn ack(success: bool) -> ModeChangeResponse {
    ModeChangeResponse {
        success,
        message: String::new(),
        new_ip: None,
        estimated_time: None,
    }
}

/// Discoverer returning queued results, `NoResponse` once drained.
pub(crate) struct ScriptedDiscoverer {
    results: Mutex<VecDeque<Result<DiscoveryResponse, DiscoveryError>>>,
    pub(crate) calls: Mutex<u32>,
}

impl ScriptedDiscoverer {
    pub(crate) fn silent() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn finding(ip: &str, port: u16) -> Self {
        let found = DiscoveryResponse {
            source_address: ip.parse().unwrap(),
            device_id: "esp32-incubator".into(),
            port,
        };
        Self {
            results: Mutex::new(VecDeque::from([Ok(found)])),
            calls: Mutex::new(0),
        }
    }

    pub(crate) fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl Discoverer for ScriptedDiscoverer {
    fn discover<'a>(
        &'a self,
        _timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoveryResponse, DiscoveryError>> + Send + 'a>> {
        *self.calls.lock().unwrap() += 1;
        let next = self.results.lock().unwrap().pop_front();
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            next.unwrap_or(Err(DiscoveryError::NoResponse))
        })
    }
}

/// Resolver with a fixed answer.
pub(crate) struct FixedResolver {
    answer: Option<IpAddr>,
    pub(crate) calls: Mutex<Vec<String>>,
}

impl FixedResolver {
    pub(crate) fn new(answer: Option<&str>) -> Self {
        Self {
            answer: answer.map(|a| a.parse().unwrap()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl HostResolver for FixedResolver {
    fn resolve<'a>(
        &'a self,
        hostname: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>> {
        self.calls.lock().unwrap().push(hostname.to_string());
        let answer = self.answer;
        Box::pin(async move { answer })
    }
}
