//! Current device endpoint.
//!
//! The endpoint is cached in memory and persisted to a JSON file so a
//! restarted app starts from the last address that worked instead of an
//! unconfigured state.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use kulucka_protocol::Endpoint;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub endpoint: Endpoint,
    /// Bumped every time the endpoint value changes.
    pub version: u64,
    /// Set while a transition has cast doubt on the endpoint.
    pub stale: bool,
}

#[derive(Debug)]
struct Current {
    endpoint: Endpoint,
    version: u64,
    stale: bool,
    /// False while the file lags behind `endpoint`.
    persisted: bool,
}

/// On-disk form of the endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEndpoint {
    #[serde(flatten)]
    endpoint: Endpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

/// Authoritative holder of the endpoint used by every outbound HTTP call.
///
/// Readers take a short read lock and never wait on disk I/O. Writers
/// serialize through `persist_lock`, so the file always ends up holding
/// the newest value.
pub struct EndpointRegistry {
    path: Option<PathBuf>,
    current: RwLock<Current>,
    persist_lock: Mutex<()>,
    version_tx: watch::Sender<u64>,
}

impl EndpointRegistry {
    /// Opens a registry backed by `path`, loading the persisted endpoint.
    ///
    /// A missing file starts from the device's AP address. A corrupt file is
    /// logged and ignored rather than blocking the app.
    pub fn open(path: PathBuf) -> Result<Self, RegistryError> {
        let endpoint = load_endpoint(&path)?.unwrap_or_else(Endpoint::access_point);
        Ok(Self::build(Some(path), endpoint))
    }

    /// Creates a registry that keeps the endpoint in memory only.
    pub fn in_memory(initial: Endpoint) -> Self {
        Self::build(None, initial)
    }

    fn build(path: Option<PathBuf>, endpoint: Endpoint) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            path,
            current: RwLock::new(Current {
                endpoint,
                version: 0,
                stale: false,
                persisted: true,
            }),
            persist_lock: Mutex::new(()),
            version_tx,
        }
    }

    /// Returns the last known endpoint, possibly stale.
    pub fn get(&self) -> Endpoint {
        self.read().endpoint.clone()
    }

    /// Returns the endpoint with its version and staleness.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let current = self.read();
        RegistrySnapshot {
            endpoint: current.endpoint.clone(),
            version: current.version,
            stale: current.stale,
        }
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn is_stale(&self) -> bool {
        self.read().stale
    }

    /// Subscribes to version changes. HTTP clients bound to an older
    /// version should be rebuilt.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// Flags the endpoint as doubtful without removing it.
    pub fn mark_stale(&self) {
        let mut current = self.write();
        if !current.stale {
            current.stale = true;
            debug!(endpoint = %current.endpoint, "endpoint marked stale");
        }
    }

    /// Replaces the endpoint and persists it.
    ///
    /// Returns `true` if the value changed. Setting the current value again
    /// only clears the stale flag: the version stays put and subscribers are
    /// not notified. If the last write to disk failed it is retried.
    ///
    /// If persisting fails, the in-memory value is still updated and the
    /// error is returned.
    pub fn set(&self, endpoint: Endpoint) -> Result<bool, RegistryError> {
        endpoint.validate()?;

        let _persist = self
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (version, changed) = {
            let mut current = self.write();
            current.stale = false;
            if current.endpoint == endpoint {
                if current.persisted {
                    return Ok(false);
                }
                (current.version, false)
            } else {
                current.endpoint = endpoint.clone();
                current.version += 1;
                current.persisted = false;
                (current.version, true)
            }
        };

        if changed {
            info!(%endpoint, version, "device endpoint updated");
            self.version_tx.send_replace(version);
        } else {
            debug!(%endpoint, "retrying endpoint write");
        }

        if let Some(path) = &self.path {
            persist_endpoint(path, &endpoint)?;
        }
        // Writers are serialized by `persist_lock`, so the value is still ours.
        self.write().persisted = true;
        Ok(changed)
    }

    /// False when the last value could not be written to disk.
    pub fn is_persisted(&self) -> bool {
        self.read().persisted
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Current> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Current> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loads the persisted endpoint. `Ok(None)` when absent or unusable.
fn load_endpoint(path: &Path) -> Result<Option<Endpoint>, RegistryError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let persisted: PersistedEndpoint = match serde_json::from_str(&data) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = ?path, error = %e, "ignoring unreadable endpoint file");
            return Ok(None);
        }
    };
    if let Err(e) = persisted.endpoint.validate() {
        warn!(path = ?path, error = %e, "ignoring invalid persisted endpoint");
        return Ok(None);
    }
    debug!(endpoint = %persisted.endpoint, saved_at = ?persisted.saved_at, "loaded endpoint");
    Ok(Some(persisted.endpoint))
}

/// Writes the endpoint via a temp file so a crash never leaves half a file.
fn persist_endpoint(path: &Path, endpoint: &Endpoint) -> Result<(), RegistryError> {
    let persisted = PersistedEndpoint {
        endpoint: endpoint.clone(),
        saved_at: Some(Utc::now()),
    };
    let json = serde_json::to_string_pretty(&persisted)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = ?path, "persisted endpoint");
    Ok(())
}
