//! Well-known hostname resolution.
//!
//! In station mode the firmware announces itself as `kulucka.local`. When
//! the device has left its AP address behind, resolving that name is the
//! cheapest way to learn the address the router handed out.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mdns_sd::{HostnameResolutionEvent, ServiceDaemon};
use tracing::{debug, warn};

use crate::interfaces::{mdns_hostname, prefer_ipv4};

/// Default time budget for one resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves a hostname to one address.
pub trait HostResolver: Send + Sync {
    /// Returns an address for `hostname`, or `None` if it cannot be resolved
    /// within the resolver's time budget.
    fn resolve<'a>(
        &'a self,
        hostname: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>>;
}

/// Resolves `.local` names with a one-shot mDNS query.
pub struct MdnsResolver {
    timeout: Duration,
}

impl MdnsResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for MdnsResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_TIMEOUT)
    }
}

impl HostResolver for MdnsResolver {
    fn resolve<'a>(
        &'a self,
        hostname: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>> {
        let name = mdns_hostname(hostname);
        let timeout = self.timeout;
        Box::pin(async move {
            // The mdns-sd receiver is blocking.
            match tokio::task::spawn_blocking(move || resolve_mdns_blocking(&name, timeout)).await
            {
                Ok(addr) => addr,
                Err(e) => {
                    warn!(error = %e, "mDNS resolution task failed");
                    None
                }
            }
        })
    }
}

fn resolve_mdns_blocking(name: &str, timeout: Duration) -> Option<IpAddr> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            warn!("failed to create mDNS daemon: {e}");
            return None;
        }
    };

    let receiver = match daemon.resolve_hostname(name, Some(timeout.as_millis() as u64)) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(host = %name, "failed to start mDNS hostname query: {e}");
            let _ = daemon.shutdown();
            return None;
        }
    };

    let deadline = Instant::now() + timeout;
    let mut found = None;
    while found.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(HostnameResolutionEvent::AddressesFound(_, addrs)) => {
                found = prefer_ipv4(addrs);
            }
            Ok(HostnameResolutionEvent::SearchTimeout(_))
            | Ok(HostnameResolutionEvent::SearchStopped(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.shutdown();
    debug!(host = %name, addr = ?found, "mDNS hostname query finished");
    found
}

/// Resolves through the operating system resolver.
///
/// Most phones and desktops resolve `.local` names natively, which makes
/// this a useful second opinion when multicast is filtered.
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVE_TIMEOUT)
    }
}

impl HostResolver for SystemResolver {
    fn resolve<'a>(
        &'a self,
        hostname: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>> {
        Box::pin(async move {
            let host = hostname.trim_end_matches('.');
            match tokio::time::timeout(self.timeout, tokio::net::lookup_host((host, 0))).await {
                Ok(Ok(addrs)) => prefer_ipv4(addrs.map(|sa| sa.ip())),
                Ok(Err(e)) => {
                    debug!(host, error = %e, "system lookup failed");
                    None
                }
                Err(_) => {
                    debug!(host, "system lookup timed out");
                    None
                }
            }
        })
    }
}

/// Tries each resolver in order and returns the first answer.
pub struct FallbackResolver {
    resolvers: Vec<Arc<dyn HostResolver>>,
}

impl FallbackResolver {
    pub fn new(resolvers: Vec<Arc<dyn HostResolver>>) -> Self {
        Self { resolvers }
    }

    /// mDNS first, then the system resolver.
    pub fn standard(timeout: Duration) -> Self {
        let mdns: Arc<dyn HostResolver> = Arc::new(MdnsResolver::new(timeout));
        let system: Arc<dyn HostResolver> = Arc::new(SystemResolver::new(timeout));
        Self::new(vec![mdns, system])
    }
}

impl HostResolver for FallbackResolver {
    fn resolve<'a>(
        &'a self,
        hostname: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>> {
        Box::pin(async move {
            for resolver in &self.resolvers {
                if let Some(addr) = resolver.resolve(hostname).await {
                    return Some(addr);
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Fixed {
        answer: Option<IpAddr>,
        calls: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(answer: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.map(|a| a.parse().unwrap()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl HostResolver for Fixed {
        fn resolve<'a>(
            &'a self,
            hostname: &'a str,
        ) -> Pin<Box<dyn Future<Output = Option<IpAddr>> + Send + 'a>> {
            self.calls.lock().unwrap().push(hostname.to_string());
            let answer = self.answer;
            Box::pin(async move { answer })
        }
    }

    #[tokio::test]
    async fn fallback_uses_first_answer() {
        let miss = Fixed::new(None);
        let hit = Fixed::new(Some("192.168.1.42"));
        let unused = Fixed::new(Some("10.0.0.1"));
        let chain = FallbackResolver::new(vec![
            miss.clone() as Arc<dyn HostResolver>,
            hit.clone() as Arc<dyn HostResolver>,
            unused.clone() as Arc<dyn HostResolver>,
        ]);

        let addr = chain.resolve("kulucka.local").await;
        assert_eq!(addr, Some("192.168.1.42".parse().unwrap()));
        assert_eq!(miss.calls.lock().unwrap().len(), 1);
        assert_eq!(hit.calls.lock().unwrap().as_slice(), ["kulucka.local"]);
        assert!(unused.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fallback_all_miss() {
        let chain = FallbackResolver::new(vec![
            Fixed::new(None) as Arc<dyn HostResolver>,
            Fixed::new(None) as Arc<dyn HostResolver>,
        ]);
        assert_eq!(chain.resolve("kulucka.local").await, None);
    }

    #[tokio::test]
    async fn system_resolver_handles_localhost() {
        let resolver = SystemResolver::default();
        let addr = resolver.resolve("localhost").await;
        assert!(addr.is_some_and(|a| a.is_loopback()));
    }
}
