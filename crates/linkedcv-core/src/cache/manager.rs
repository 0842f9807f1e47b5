use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{join_all, try_join_all};
use reqwest::Method;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::entry::{Request, Response};
use super::manifest::AssetManifest;
use super::network::Network;
use super::storage::CacheStorage;
use crate::error::WorkerError;
use crate::version::CacheName;

/// Lifecycle of one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninstalled,
    Installing,
    /// Installed, waiting to take over from the previous worker
    Waiting,
    Activating,
    Active,
}

/// Immutable settings for one worker: which generation it owns and what it precaches.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_name: CacheName,
    pub manifest: AssetManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub precached: usize,
    /// The new worker asks to replace the old one without waiting for tabs to close
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub cache_name: String,
    pub deleted: Vec<String>,
    pub clients_claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the host performs the request itself
    Passthrough,
    Responded {
        response: Response,
        source: ResponseSource,
    },
}

#[derive(Debug)]
struct Lifecycle {
    state: WorkerState,
    skip_waiting: bool,
    controls_clients: bool,
}

/// Offline cache worker: precaches the manifest on install, drops stale
/// generations on activate and answers GET requests cache-first.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    lifecycle: Mutex<Lifecycle>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self::with_state(config, storage, network, WorkerState::Uninstalled)
    }

    /// Rebuild the worker that an earlier process installed and activated.
    pub async fn resume(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, WorkerError> {
        let name = config.cache_name.as_str();
        if !storage.has(name).await? {
            return Err(WorkerError::NotInstalled(name.to_string()));
        }
        let worker = Self::with_state(config, storage, network, WorkerState::Active);
        worker.lock_lifecycle().controls_clients = true;
        Ok(worker)
    }

    fn with_state(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        state: WorkerState,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            network,
            lifecycle: Mutex::new(Lifecycle {
                state,
                skip_waiting: false,
                controls_clients: false,
            }),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        self.lock_lifecycle().state
    }

    pub fn should_skip_waiting(&self) -> bool {
        self.lock_lifecycle().skip_waiting
    }

    pub fn controls_clients(&self) -> bool {
        self.lock_lifecycle().controls_clients
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(
        &self,
        from: WorkerState,
        to: WorkerState,
        event: &'static str,
    ) -> Result<(), WorkerError> {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != from {
            return Err(WorkerError::InvalidTransition {
                from: lifecycle.state,
                event,
            });
        }
        debug!(event = event, from = ?from, to = ?to, "Worker transition");
        lifecycle.state = to;
        Ok(())
    }

    fn set_state(&self, state: WorkerState) {
        self.lock_lifecycle().state = state;
    }

    // ===== Install =====

    /// Precache every manifest asset into the current generation.
    ///
    /// All or nothing: if any asset can't be fetched nothing is stored, a
    /// generation created by this attempt is removed again, and the worker
    /// goes back to `Uninstalled` so the host can retry later.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.transition(WorkerState::Uninstalled, WorkerState::Installing, "install")?;
        let name = self.config.cache_name.as_str();
        info!(cache = name, assets = self.config.manifest.len(), "Installing");

        match self.precache().await {
            Ok(precached) => {
                let mut lifecycle = self.lock_lifecycle();
                lifecycle.state = WorkerState::Waiting;
                lifecycle.skip_waiting = true;
                info!(cache = name, precached = precached, "Install complete");
                Ok(InstallReport {
                    cache_name: name.to_string(),
                    precached,
                    skip_waiting: true,
                })
            }
            Err(e) => {
                warn!(cache = name, error = %e, "Install failed");
                self.set_state(WorkerState::Uninstalled);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<usize, WorkerError> {
        let name = self.config.cache_name.as_str();
        let existed = self.storage.has(name).await?;
        self.storage.open(name).await?;

        let fetches = self
            .config
            .manifest
            .paths()
            .iter()
            .map(|path| self.fetch_for_install(path));

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                if !existed {
                    if let Err(cleanup) = self.storage.delete(name).await {
                        debug!(cache = name, error = %cleanup, "Failed to drop empty generation");
                    }
                }
                return Err(e);
            }
        };

        let count = entries.len();
        self.storage.put_all(name, entries).await?;
        Ok(count)
    }

    async fn fetch_for_install(&self, path: &str) -> Result<(Request, Response), WorkerError> {
        let request = Request::get(path);
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| WorkerError::Install {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        if !response.is_success() {
            return Err(WorkerError::install_status(path, response.status, &response.body));
        }
        Ok((request, response))
    }

    // ===== Activate =====

    /// Delete every generation other than the current one, then take control
    /// of all clients.
    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.transition(WorkerState::Waiting, WorkerState::Activating, "activate")?;
        let name = self.config.cache_name.as_str();

        let deleted = match self.remove_stale_generations().await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(cache = name, error = %e, "Activation failed");
                self.set_state(WorkerState::Waiting);
                return Err(e);
            }
        };

        let mut lifecycle = self.lock_lifecycle();
        lifecycle.state = WorkerState::Active;
        lifecycle.controls_clients = true;
        info!(cache = name, removed = deleted.len(), "Activated");

        Ok(ActivateReport {
            cache_name: name.to_string(),
            deleted,
            clients_claimed: true,
        })
    }

    async fn remove_stale_generations(&self) -> Result<Vec<String>, WorkerError> {
        let current = self.config.cache_name.as_str();
        let stale: Vec<String> = self
            .storage
            .keys()
            .await?
            .into_iter()
            .filter(|key| key != current)
            .collect();

        let removals = stale.iter().map(|key| async move {
            debug!(generation = %key, "Deleting stale cache generation");
            self.storage.delete(key).await
        });
        try_join_all(removals).await?;
        Ok(stale)
    }

    // ===== Fetch =====

    /// Answer a request cache-first.
    ///
    /// Hits are served verbatim and never revalidated. Misses go to the
    /// network and the response is written back in the background; a failed
    /// write is logged and dropped. A network failure on a miss is returned
    /// to the caller.
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome, WorkerError> {
        if request.method != Method::GET {
            return Ok(FetchOutcome::Passthrough);
        }
        if self.state() != WorkerState::Active {
            return Ok(FetchOutcome::Passthrough);
        }

        let name = self.config.cache_name.as_str();
        if let Some(cached) = self.storage.match_request(name, request).await? {
            debug!(path = %request.path, "Cache hit");
            return Ok(FetchOutcome::Responded {
                response: cached,
                source: ResponseSource::Cache,
            });
        }

        debug!(path = %request.path, "Cache miss");
        let response = self.network.fetch(request).await?;
        self.spawn_write(request.clone(), response.clone());

        Ok(FetchOutcome::Responded {
            response,
            source: ResponseSource::Network,
        })
    }

    fn spawn_write(&self, request: Request, response: Response) {
        let storage = Arc::clone(&self.storage);
        let name = self.config.cache_name.to_string();

        let handle = tokio::spawn(async move {
            if let Err(e) = storage.put(&name, &request, response).await {
                debug!(cache = %name, path = %request.path, error = %e, "Background cache write failed");
            }
        });

        let mut pending = self
            .pending_writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for background cache writes started by earlier fetches.
    pub async fn flush_writes(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self
                .pending_writes
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *pending)
        };
        join_all(handles).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
