//! AP/Station mode transitions.
//!
//! [`ModeTransitionCoordinator`] drives one switch at a time: ask the device
//! to change mode, mark the registry endpoint stale, poll the best-guess
//! address, fall back to broadcast discovery, then store what was confirmed.
//! Work runs on a spawned task; callers get a [`TransitionHandle`] back
//! immediately.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use kulucka_device::{DeviceApi, HttpDeviceClient};
use kulucka_discovery::{
    BroadcastDiscoverer, Discoverer, DiscoveryError, DiscoveryResponse, FallbackResolver,
};
use kulucka_protocol::constants::{AP_DEFAULT_HOST, DEFAULT_HTTP_PORT, DEVICE_HOSTNAME};
use kulucka_protocol::{Endpoint, EndpointError, ModeChangeRequest, NetworkMode, WifiCredentials};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::{ModeTransitionError, RegistryError, SetupError, VerificationError};
use crate::poller::{AttemptFailure, ReconnectionPoller};
use crate::registry::EndpointRegistry;
use crate::types::{ModeTransition, RetryBudget, TransitionEvent, TransitionKind, TransitionStatus};

/// Knobs for one coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionSettings {
    pub budget: RetryBudget,
    /// Window for the broadcast fallback.
    pub discovery_timeout: Duration,
    /// Fixed address of the device in AP mode.
    pub ap_host: String,
    pub http_port: u16,
    /// Name the device answers to in station mode.
    pub hostname: String,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            budget: RetryBudget::default(),
            discovery_timeout: kulucka_discovery::types::DEFAULT_DISCOVERY_TIMEOUT,
            ap_host: AP_DEFAULT_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            hostname: DEVICE_HOSTNAME.to_string(),
        }
    }
}

/// Pending outcome of a transition.
///
/// Dropping the handle does not stop the transition; call
/// [`cancel`](Self::cancel) for that.
pub struct TransitionHandle {
    outcome: oneshot::Receiver<Result<Endpoint, ModeTransitionError>>,
    cancel: CancellationToken,
}

impl TransitionHandle {
    /// Aborts the in-flight request, poll or discovery.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the terminal outcome.
    pub async fn wait(self) -> Result<Endpoint, ModeTransitionError> {
        self.outcome
            .await
            .unwrap_or(Err(ModeTransitionError::Cancelled))
    }
}

/// The transition currently owning the device, if any.
#[derive(Default)]
struct Slot {
    transition: Option<ModeTransition>,
    cancel: Option<CancellationToken>,
    /// Set while a manual endpoint is being stored.
    manual: bool,
}

/// Shared state handed to the spawned transition task.
#[derive(Clone)]
struct TransitionContext {
    registry: Arc<EndpointRegistry>,
    device: Arc<dyn DeviceApi>,
    discoverer: Arc<dyn Discoverer>,
    poller: Arc<ReconnectionPoller>,
    settings: Arc<TransitionSettings>,
    slot: Arc<Mutex<Slot>>,
    /// Last address the device answered on in station mode.
    last_station: Arc<Mutex<Option<Endpoint>>>,
    events_tx: mpsc::Sender<TransitionEvent>,
}

/// Drives AP/Station switches with a single terminal outcome each.
pub struct ModeTransitionCoordinator {
    ctx: TransitionContext,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<TransitionEvent>>>,
}

impl ModeTransitionCoordinator {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        device: Arc<dyn DeviceApi>,
        discoverer: Arc<dyn Discoverer>,
        poller: ReconnectionPoller,
        settings: TransitionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let current = registry.get();
        let last_station = (current.mode == NetworkMode::Station).then_some(current);
        Self {
            ctx: TransitionContext {
                registry,
                device,
                discoverer,
                poller: Arc::new(poller),
                settings: Arc::new(settings),
                slot: Arc::new(Mutex::new(Slot::default())),
                last_station: Arc::new(Mutex::new(last_station)),
                events_tx,
            },
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Wires the HTTP client, UDP discoverer, hostname resolvers and the
    /// persisted registry from configuration.
    pub fn from_config(config: &LinkConfig) -> Result<Self, SetupError> {
        let device: Arc<dyn DeviceApi> = Arc::new(HttpDeviceClient::new(config.request_timeout())?);
        let registry = Arc::new(EndpointRegistry::open(config.endpoint_path())?);
        let discoverer = Arc::new(BroadcastDiscoverer::new(config.discovery.clone()));
        let resolver = Arc::new(FallbackResolver::standard(config.resolve_timeout()));
        let settings = config.transition_settings();

        let poller = ReconnectionPoller::new(device.clone())
            .with_resolver(resolver)
            .with_ap_host(settings.ap_host.clone())
            .with_hostname(settings.hostname.clone())
            .with_expected_device_id(config.expected_device_id.clone());

        info!(
            endpoint = %registry.get(),
            path = ?registry.path(),
            "connection core ready"
        );
        Ok(Self::new(registry, device, discoverer, poller, settings))
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.ctx.registry
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<TransitionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Phase of the current or most recent transition.
    pub fn status(&self) -> TransitionStatus {
        self.ctx
            .lock_slot()
            .transition
            .as_ref()
            .map_or(TransitionStatus::Idle, |t| t.status)
    }

    /// Snapshot of the current or most recent transition.
    pub fn transition(&self) -> Option<ModeTransition> {
        self.ctx.lock_slot().transition.clone()
    }

    /// Asks the device to switch to `target` and follows it to its new address.
    pub fn request_switch(
        &self,
        target: NetworkMode,
    ) -> Result<TransitionHandle, ModeTransitionError> {
        self.request_switch_with(target, None)
    }

    /// Like [`request_switch`](Self::request_switch), passing router
    /// credentials for station mode.
    pub fn request_switch_with(
        &self,
        target: NetworkMode,
        credentials: Option<WifiCredentials>,
    ) -> Result<TransitionHandle, ModeTransitionError> {
        if target == NetworkMode::Unknown {
            return Err(ModeTransitionError::InvalidTarget(target));
        }
        let from = self.ctx.registry.get().mode;
        let cancel = self.ctx.begin(TransitionKind::Switch, from, target)?;
        info!(%from, %target, "mode switch requested");

        Ok(self.spawn(cancel, move |ctx, cancel| async move {
            ctx.run_switch(target, credentials, &cancel).await
        }))
    }

    /// Re-confirms the current endpoint without asking the device to move.
    ///
    /// Polls the current address and falls back to broadcast discovery, the
    /// same way the verification phase of a switch does.
    pub fn reconnect(&self) -> Result<TransitionHandle, ModeTransitionError> {
        let current = self.ctx.registry.get();
        let cancel = self
            .ctx
            .begin(TransitionKind::Reconnect, current.mode, current.mode)?;
        info!(endpoint = %current, "manual reconnect");

        Ok(self.spawn(cancel, move |ctx, cancel| async move {
            let budget = ctx.settings.budget.clone();
            ctx.verify_and_commit(current, &budget, &cancel).await
        }))
    }

    /// Runs one broadcast discovery and stores whatever answers.
    pub fn discover_and_apply(&self) -> Result<TransitionHandle, ModeTransitionError> {
        let from = self.ctx.registry.get().mode;
        let cancel = self
            .ctx
            .begin(TransitionKind::Discover, from, NetworkMode::Unknown)?;

        Ok(self.spawn(cancel, move |ctx, cancel| async move {
            let found = match ctx.discoverer.discover(ctx.settings.discovery_timeout, &cancel).await {
                Ok(found) => found,
                Err(DiscoveryError::Cancelled) => return Err(ModeTransitionError::Cancelled),
                Err(e) => return Err(ModeTransitionError::DiscoveryFailed(e.to_string())),
            };
            let endpoint = ctx.confirm_discovered(&found, &cancel).await?;
            ctx.commit(endpoint)
        }))
    }

    /// Stores an address typed in by the user. The mode stays unknown until
    /// the device is next polled.
    ///
    /// A failed write to disk is reported as [`ModeTransitionError::Registry`]
    /// even though the address is already in use.
    pub fn set_manual_endpoint(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Endpoint, ModeTransitionError> {
        if port == 0 {
            return Err(EndpointError::MissingPort(NetworkMode::Unknown).into());
        }
        let endpoint = Endpoint::new(host, port, NetworkMode::Unknown)?;

        {
            let mut slot = self.ctx.lock_slot();
            if slot.manual
                || slot
                    .transition
                    .as_ref()
                    .is_some_and(|t| t.status.is_in_flight())
            {
                return Err(ModeTransitionError::AlreadyInProgress);
            }
            slot.manual = true;
        }

        info!(endpoint = %endpoint, "manual endpoint set");
        let stored = match self.ctx.registry.set(endpoint.clone()) {
            Ok(_) => Ok(endpoint),
            Err(RegistryError::InvalidEndpoint(e)) => Err(e.into()),
            Err(e) => Err(ModeTransitionError::Registry(e.to_string())),
        };
        self.ctx.lock_slot().manual = false;
        stored
    }

    /// Cancels the in-flight transition. Returns `false` if there is none.
    pub fn cancel(&self) -> bool {
        match self.ctx.lock_slot().cancel.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn spawn<F, Fut>(&self, cancel: CancellationToken, run: F) -> TransitionHandle
    where
        F: FnOnce(TransitionContext, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = Result<Endpoint, ModeTransitionError>> + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let work = run(ctx.clone(), cancel.clone());
        tokio::spawn(async move {
            let result = work.await;
            ctx.finish(&result);
            let _ = outcome_tx.send(result);
        });
        TransitionHandle {
            outcome: outcome_rx,
            cancel,
        }
    }
}

impl TransitionContext {
    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the device for a new transition.
    fn begin(
        &self,
        kind: TransitionKind,
        from_mode: NetworkMode,
        to_mode: NetworkMode,
    ) -> Result<CancellationToken, ModeTransitionError> {
        let mut slot = self.lock_slot();
        if let Some(current) = &slot.transition
            && current.status.is_in_flight()
        {
            debug!(status = %current.status, "transition already in progress");
            return Err(ModeTransitionError::AlreadyInProgress);
        }
        if slot.manual {
            debug!("manual endpoint being stored");
            return Err(ModeTransitionError::AlreadyInProgress);
        }

        let status = match kind {
            TransitionKind::Switch => TransitionStatus::SwitchRequested,
            TransitionKind::Reconnect | TransitionKind::Discover => TransitionStatus::Verifying,
        };
        let cancel = CancellationToken::new();
        slot.transition = Some(ModeTransition {
            kind,
            from_mode,
            to_mode,
            status,
            attempt: 0,
            last_error: None,
        });
        slot.cancel = Some(cancel.clone());
        drop(slot);

        self.emit(TransitionEvent::StatusChanged { kind, status });
        Ok(cancel)
    }

    fn set_status(&self, status: TransitionStatus) {
        let kind = {
            let mut slot = self.lock_slot();
            let Some(transition) = slot.transition.as_mut() else {
                return;
            };
            if transition.status == status {
                return;
            }
            transition.status = status;
            transition.kind
        };
        self.emit(TransitionEvent::StatusChanged { kind, status });
    }

    fn attempt_failed(&self, failure: &AttemptFailure) {
        if let Some(transition) = self.lock_slot().transition.as_mut() {
            transition.attempt = failure.attempt;
            transition.last_error = Some(failure.error.clone());
        }
        self.emit(TransitionEvent::AttemptFailed {
            attempt: failure.attempt,
            error: failure.error.clone(),
            next_retry: failure.next_delay,
        });
    }

    /// Records the terminal state before the outcome is delivered, so a
    /// caller that awaited the handle can immediately start another.
    fn finish(&self, result: &Result<Endpoint, ModeTransitionError>) {
        let status = if result.is_ok() {
            TransitionStatus::Succeeded
        } else {
            TransitionStatus::Failed
        };
        let kind = {
            let mut slot = self.lock_slot();
            slot.cancel = None;
            let Some(transition) = slot.transition.as_mut() else {
                return;
            };
            transition.status = status;
            if let Err(e) = result {
                transition.last_error = Some(e.to_string());
            }
            transition.kind
        };

        match result {
            Ok(endpoint) => info!(?kind, endpoint = %endpoint, "transition succeeded"),
            Err(e) => warn!(?kind, error = %e, "transition failed"),
        }
        self.emit(TransitionEvent::StatusChanged { kind, status });
        self.emit(TransitionEvent::Finished(result.clone()));
    }

    fn emit(&self, event: TransitionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("transition event dropped: {e}");
        }
    }

    async fn run_switch(
        &self,
        target: NetworkMode,
        credentials: Option<WifiCredentials>,
        cancel: &CancellationToken,
    ) -> Result<Endpoint, ModeTransitionError> {
        let origin = self.registry.get();
        let request = ModeChangeRequest::new(target, credentials.as_ref());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModeTransitionError::Cancelled),
            r = self.device.request_mode_change(&origin, &request) => r,
        };
        let ack = result.map_err(|e| ModeTransitionError::SwitchRequestFailed(e.to_string()))?;

        if !ack.success {
            let reason = if ack.message.is_empty() {
                "no reason given".to_string()
            } else {
                ack.message
            };
            return Err(ModeTransitionError::SwitchRejectedByDevice(reason));
        }

        let budget = self.settings.budget.seeded(ack.estimated_delay());
        let candidate = self.candidate(target, &origin, ack.new_ip_hint());
        info!(
            candidate = %candidate,
            initial_delay_ms = budget.initial_delay.as_millis() as u64,
            "mode change accepted"
        );
        self.verify_and_commit(candidate, &budget, cancel).await
    }

    /// Best guess of where the device will answer after switching.
    ///
    /// Station order: the device's hint, the last station address, then the
    /// AP literal when the poller can resolve the hostname after it, else the
    /// hostname itself.
    fn candidate(&self, target: NetworkMode, origin: &Endpoint, hint: Option<&str>) -> Endpoint {
        let port = if origin.port == 0 {
            self.settings.http_port
        } else {
            origin.port
        };
        if let Some(ip) = hint {
            match Endpoint::new(ip, port, target) {
                Ok(endpoint) => return endpoint,
                Err(e) => warn!(hint = %ip, error = %e, "ignoring new IP hint"),
            }
        }
        if target == NetworkMode::Ap {
            return Endpoint {
                host: self.settings.ap_host.clone(),
                port,
                mode: NetworkMode::Ap,
            };
        }
        if origin.mode == NetworkMode::Station {
            return origin.clone();
        }
        if let Some(last) = self.last_station() {
            return last;
        }
        let host = if self.poller.has_resolver() {
            self.settings.ap_host.clone()
        } else {
            self.settings.hostname.clone()
        };
        Endpoint {
            host,
            port,
            mode: target,
        }
    }

    fn last_station(&self) -> Option<Endpoint> {
        self.last_station
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_station(&self, endpoint: &Endpoint) {
        *self
            .last_station
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());
    }

    /// Verification phase: poll, then one broadcast as a second chance.
    async fn verify_and_commit(
        &self,
        candidate: Endpoint,
        budget: &RetryBudget,
        cancel: &CancellationToken,
    ) -> Result<Endpoint, ModeTransitionError> {
        self.set_status(TransitionStatus::Verifying);
        self.registry.mark_stale();

        let verification = match self
            .poller
            .verify_with(&candidate, budget, cancel, |f| self.attempt_failed(f))
            .await
        {
            Ok(endpoint) => return self.commit(endpoint),
            Err(VerificationError::Cancelled) => return Err(ModeTransitionError::Cancelled),
            Err(e) => e,
        };

        info!(candidate = %candidate, error = %verification, "polling failed, trying broadcast discovery");
        let found = match self
            .discoverer
            .discover(self.settings.discovery_timeout, cancel)
            .await
        {
            Ok(found) => found,
            Err(DiscoveryError::Cancelled) => return Err(ModeTransitionError::Cancelled),
            Err(e) => {
                return Err(ModeTransitionError::BothPathsExhausted {
                    verification: verification.to_string(),
                    discovery: e.to_string(),
                });
            }
        };

        let endpoint = self.confirm_discovered(&found, cancel).await?;
        self.commit(endpoint)
    }

    /// Asks a discovered device for its mode once. If it does not answer the
    /// discovered address is still used, with the mode left unknown.
    async fn confirm_discovered(
        &self,
        found: &DiscoveryResponse,
        cancel: &CancellationToken,
    ) -> Result<Endpoint, ModeTransitionError> {
        let discovered = found.endpoint();
        info!(endpoint = %discovered, device_id = %found.device_id, "device discovered");
        match self
            .poller
            .verify(&discovered, &RetryBudget::single(), cancel)
            .await
        {
            Ok(endpoint) => Ok(endpoint),
            Err(VerificationError::Cancelled) => Err(ModeTransitionError::Cancelled),
            Err(e) => {
                debug!(error = %e, "discovered device did not report its mode");
                if discovered.host != self.settings.ap_host {
                    self.remember_station(&discovered.with_mode(NetworkMode::Station));
                }
                Ok(discovered)
            }
        }
    }

    /// Stores the confirmed endpoint. A failed write to disk is not a failed
    /// transition: the in-memory value is already updated.
    fn commit(&self, endpoint: Endpoint) -> Result<Endpoint, ModeTransitionError> {
        if endpoint.mode == NetworkMode::Station {
            self.remember_station(&endpoint);
        }
        match self.registry.set(endpoint.clone()) {
            Ok(_) => Ok(endpoint),
            Err(RegistryError::InvalidEndpoint(e)) => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "endpoint updated but not persisted");
                Ok(endpoint)
            }
        }
    }
}
