use std::future::Future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::time::Duration;

use kulucka_protocol::constants::MAX_DATAGRAM_SIZE;
use kulucka_protocol::{DiscoveryResponse, discovery_probe, parse_discovery_response};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::DiscoveryError;
use crate::interfaces::interface_broadcast_addrs;
use crate::types::DiscoveryConfig;

/// Anything that can locate the device on the local network.
///
/// The connection coordinator holds a `dyn Discoverer` so tests can swap
/// the UDP implementation for a scripted one.
pub trait Discoverer: Send + Sync {
    /// Runs one discovery round, returning the first device that answers.
    fn discover<'a>(
        &'a self,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoveryResponse, DiscoveryError>> + Send + 'a>>;
}

/// Locates the incubator by broadcasting the discovery probe over UDP.
pub struct BroadcastDiscoverer {
    config: DiscoveryConfig,
}

impl BroadcastDiscoverer {
    /// Creates a discoverer with the given settings.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Returns the socket addresses the probe goes to, without duplicates.
    pub fn targets(&self) -> Vec<SocketAddr> {
        let mut addrs = self.config.broadcast_addrs.clone();
        if self.config.include_interface_broadcasts {
            for addr in interface_broadcast_addrs() {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        addrs
            .into_iter()
            .map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, self.config.port)))
            .collect()
    }

    /// Broadcasts the probe and waits for the first valid reply.
    ///
    /// Foreign or malformed datagrams are skipped. The socket lives only for
    /// the duration of this call and is closed on every return path.
    pub async fn discover(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResponse, DiscoveryError> {
        if timeout.is_zero() {
            return Err(DiscoveryError::InvalidTimeout);
        }
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        let deadline = Instant::now() + timeout;
        let socket = UdpSocket::bind(SocketAddrV4::new(self.config.bind_ip, 0)).await?;
        socket.set_broadcast(true)?;

        let targets = self.targets();
        send_probe(&socket, &targets).await?;
        debug!(targets = targets.len(), ?timeout, "discovery probe sent");

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let resend_every = self.config.resend_interval();
        let mut next_resend = resend_every.map(|every| Instant::now() + every);

        loop {
            let resend_at = next_resend.unwrap_or(deadline);
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("discovery cancelled");
                    return Err(DiscoveryError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(?timeout, "discovery timed out");
                    return Err(DiscoveryError::NoResponse);
                }
                _ = tokio::time::sleep_until(resend_at), if next_resend.is_some() => {
                    // A lost probe is not fatal; the next round may get through.
                    if let Err(e) = send_probe(&socket, &targets).await {
                        debug!(error = %e, "probe re-send failed");
                    }
                    next_resend = resend_every.map(|every| Instant::now() + every);
                    continue;
                }
                result = socket.recv_from(&mut buf) => result,
            };

            match received {
                Ok((len, from)) => match parse_discovery_response(&buf[..len], from.ip()) {
                    Ok(response) => {
                        info!(
                            host = %response.source_address,
                            port = response.port,
                            device = %response.device_id,
                            "device discovered"
                        );
                        return Ok(response);
                    }
                    Err(e) => {
                        trace!(%from, len, reason = %e, "ignoring datagram");
                    }
                },
                Err(e) => {
                    // ICMP errors from earlier sends surface here on some
                    // platforms; keep listening.
                    debug!(error = %e, "discovery receive failed");
                }
            }
        }
    }
}

impl Discoverer for BroadcastDiscoverer {
    fn discover<'a>(
        &'a self,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoveryResponse, DiscoveryError>> + Send + 'a>> {
        Box::pin(BroadcastDiscoverer::discover(self, timeout, cancel))
    }
}

/// Sends the probe to every target. Fails only if no send succeeded.
async fn send_probe(socket: &UdpSocket, targets: &[SocketAddr]) -> Result<(), DiscoveryError> {
    let mut last_err = None;
    let mut sent = 0usize;

    for target in targets {
        match socket.send_to(discovery_probe(), target).await {
            Ok(_) => sent += 1,
            Err(e) => {
                warn!(%target, error = %e, "failed to send discovery probe");
                last_err = Some(e);
            }
        }
    }

    if sent == 0 {
        let err = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no broadcast targets configured")
        });
        return Err(DiscoveryError::Socket(err));
    }
    Ok(())
}
