//! The offline cache worker.
//!
//! `ServiceWorker` owns the lifecycle state and the four event handlers:
//! - install: pre-populate the current cache with the asset list
//! - activate: delete every cache whose name is not the current one
//! - fetch: cache-first, falling back to network and storing eligible responses
//! - notification click: focus an open window or open the entry page

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CacheStore, DiskStorage};
use crate::clients::{Clients, Notification, WindowClient, WindowRegistry};
use crate::config::{InstallPolicy, NetworkFailurePolicy, WorkerConfig};
use crate::error::WorkerError;
use crate::http::{Request, Response};
use crate::network::{HttpNetwork, Network};

/// Maximum concurrent asset fetches during install.
const MAX_CONCURRENT_ASSET_FETCHES: usize = 6;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, no lifecycle event handled yet
    Parsed,
    Installing,
    /// Installed, waiting to activate
    Installed,
    Activating,
    /// Active and intercepting fetches
    Activated,
    /// Install failed; this worker will never activate
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Absolute URLs now in the cache
    pub cached: Vec<String>,
    /// Assets skipped under the lenient policy, with the reason
    pub failed: Vec<(String, String)>,
}

/// Outcome of a completed activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale cache names that were deleted
    pub deleted: Vec<String>,
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    pub window: WindowClient,
    /// True when no window was open and the entry page was opened
    pub opened: bool,
}

pub struct ServiceWorker {
    cache_name: String,
    assets: Vec<String>,
    scope: Url,
    entry_url: String,
    install_policy: InstallPolicy,
    network_failure_policy: NetworkFailurePolicy,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
}

impl ServiceWorker {
    pub fn new(
        config: &WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<dyn Clients>,
    ) -> Result<Self> {
        Ok(Self {
            cache_name: config.cache_name.clone(),
            assets: config.assets.clone(),
            scope: config.scope_url()?,
            entry_url: config.entry_url.clone(),
            install_policy: config.install_policy,
            network_failure_policy: config.network_failure_policy,
            storage,
            network,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
        })
    }

    /// Build a worker backed by disk storage and real HTTP.
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let storage = DiskStorage::new(config.cache_dir()?)?;
        let network = HttpNetwork::new(config.scope_url()?, config.request_timeout_secs)?;
        Self::new(
            config,
            Arc::new(storage),
            Arc::new(network),
            Arc::new(WindowRegistry::new()),
        )
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether install asked to activate without waiting for old clients.
    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Move from `expected` to `next`, or fail without changing state.
    async fn transition(&self, expected: WorkerState, next: WorkerState) -> Result<(), WorkerError> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(WorkerError::InvalidState {
                expected,
                actual: *state,
            });
        }
        let current = *state;
        debug!(from = %current, to = %next, "Worker state change");
        *state = next;
        Ok(())
    }

    async fn set_state(&self, next: WorkerState) {
        *self.state.write().await = next;
    }

    // ===== Install =====

    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.transition(WorkerState::Parsed, WorkerState::Installing)
            .await?;

        match self.populate_cache().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed).await;
                self.skip_waiting.store(true, Ordering::SeqCst);
                info!(
                    cache = %self.cache_name,
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    "Opened cache and added core resources"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant).await;
                warn!(cache = %self.cache_name, error = %e, "Install failed");
                Err(e)
            }
        }
    }

    async fn populate_cache(&self) -> Result<InstallReport, WorkerError> {
        let existed = self.storage.has(&self.cache_name).await?;
        let mut report = InstallReport::default();
        let mut failures: Vec<WorkerError> = Vec::new();

        let mut requests = Vec::new();
        for asset in &self.assets {
            match Request::get(asset.as_str()).resolve(&self.scope) {
                Ok(request) => requests.push(request),
                Err(e) => failures.push(WorkerError::Install {
                    url: asset.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let network = &self.network;
        let fetched: Vec<(Request, _)> = stream::iter(requests)
            .map(|request| async move {
                let result = network.fetch(&request).await;
                (request, result)
            })
            .buffered(MAX_CONCURRENT_ASSET_FETCHES)
            .collect()
            .await;

        let mut ready = Vec::new();
        for (request, result) in fetched {
            match result {
                Ok(response) if response.ok() => ready.push((request, response)),
                Ok(response) => failures.push(WorkerError::bad_status(
                    &request.url,
                    response.status,
                    &response.body,
                )),
                Err(e) => failures.push(WorkerError::Install {
                    url: request.url.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        if !failures.is_empty() {
            match self.install_policy {
                // The store is not opened yet, so a failed install leaves no trace
                InstallPolicy::Strict => return Err(failures.swap_remove(0)),
                InstallPolicy::Lenient => {
                    for failure in failures {
                        warn!(error = %failure, "Skipping asset");
                        if let WorkerError::Install { url, reason } = failure {
                            report.failed.push((url, reason));
                        }
                    }
                }
            }
        }

        let cache = self.storage.open(&self.cache_name).await?;
        let mut written: Vec<Request> = Vec::new();
        for (request, response) in ready {
            match cache.put(&request, response).await {
                Ok(()) => {
                    report.cached.push(request.url.clone());
                    written.push(request);
                }
                Err(e) => match self.install_policy {
                    InstallPolicy::Strict => {
                        self.roll_back(cache.as_ref(), existed, &written).await;
                        return Err(WorkerError::Cache(e));
                    }
                    InstallPolicy::Lenient => {
                        warn!(url = %request.url, error = %e, "Failed to store asset");
                        report.failed.push((request.url, e.to_string()));
                    }
                },
            }
        }

        Ok(report)
    }

    /// Undo a partially written strict install.
    ///
    /// A store this install created is dropped whole; a store that already
    /// existed only loses the entries written here.
    async fn roll_back(&self, cache: &dyn CacheStore, existed: bool, written: &[Request]) {
        if !existed {
            if let Err(e) = self.storage.delete(&self.cache_name).await {
                warn!(cache = %self.cache_name, error = %e, "Failed to remove partial cache");
            }
            return;
        }
        for request in written {
            if let Err(e) = cache.delete(request).await {
                warn!(url = %request.url, error = %e, "Failed to remove partial cache entry");
            }
        }
    }

    /// Wake an already-activated worker in a fresh process.
    ///
    /// The cache persists between runs but lifecycle state doesn't, so a
    /// worker whose current cache already exists goes straight to `Activated`.
    pub async fn resume(&self) -> Result<(), WorkerError> {
        if !self.storage.has(&self.cache_name).await? {
            return Err(WorkerError::NotInstalled(self.cache_name.clone()));
        }
        self.transition(WorkerState::Parsed, WorkerState::Activated)
            .await?;
        info!(cache = %self.cache_name, "Resumed active worker");
        Ok(())
    }

    // ===== Activate =====

    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.transition(WorkerState::Installed, WorkerState::Activating)
            .await?;

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                // Nothing was deleted yet, so activation can be retried
                self.set_state(WorkerState::Installed).await;
                warn!(error = %e, "Failed to list caches");
                return Err(WorkerError::Cache(e));
            }
        };
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        let storage = &self.storage;
        let results = join_all(stale.iter().map(|name| async move {
            (name.clone(), storage.delete(name).await)
        }))
        .await;

        let mut report = ActivateReport::default();
        for (name, result) in results {
            match result {
                Ok(true) => {
                    info!(cache = %name, "Deleted old cache");
                    report.deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Failed to delete old cache"),
            }
        }

        if let Err(e) = self.clients.claim().await {
            warn!(error = %e, "Failed to claim clients");
        }

        self.set_state(WorkerState::Activated).await;
        info!(cache = %self.cache_name, "Worker activated");
        Ok(report)
    }

    // ===== Fetch =====

    /// Answer a request cache-first.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Response, WorkerError> {
        let request = request.resolve(&self.scope)?;

        if self.state().await != WorkerState::Activated {
            debug!(url = %request.url, "Worker not active, passing request through");
            return self.fetch_from_network(&request, None).await;
        }

        let cache = match self.storage.open(&self.cache_name).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "Failed to open cache");
                None
            }
        };

        if request.is_get() {
            if let Some(ref cache) = cache {
                match cache.match_request(&request).await {
                    Ok(Some(response)) => {
                        debug!(url = %request.url, "Cache hit");
                        return Ok(response);
                    }
                    Ok(None) => debug!(url = %request.url, "Cache miss"),
                    Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
                }
            }
        }

        self.fetch_from_network(&request, cache.as_deref()).await
    }

    async fn fetch_from_network(
        &self,
        request: &Request,
        cache: Option<&dyn CacheStore>,
    ) -> Result<Response, WorkerError> {
        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                return match self.network_failure_policy {
                    NetworkFailurePolicy::Propagate => Err(e.into()),
                    NetworkFailurePolicy::Fallback => {
                        warn!(url = %request.url, error = %e, "Network failed, returning fallback response");
                        Ok(Response::fallback())
                    }
                };
            }
        };

        if let Some(cache) = cache {
            if request.is_get() && response.is_cacheable() {
                // Cache write failures never block the response
                if let Err(e) = cache.put(request, response.clone()).await {
                    warn!(url = %request.url, error = %e, "Failed to cache response");
                }
            }
        }

        Ok(response)
    }

    // ===== Notification click =====

    /// Close the notification, then focus an open window or open the entry page.
    pub async fn handle_notification_click(
        &self,
        notification: &Notification,
    ) -> Result<ClickOutcome, WorkerError> {
        if let Err(e) = self.clients.close_notification(notification).await {
            warn!(tag = %notification.tag, error = %e, "Failed to close notification");
        }

        let entry = Request::get(self.entry_url.as_str()).resolve(&self.scope)?.url;
        let windows = self
            .clients
            .match_all()
            .await
            .map_err(WorkerError::Clients)?;

        let target = windows
            .iter()
            .find(|w| w.url == entry)
            .or_else(|| windows.first());

        let opened = target.is_none();
        let window = match target {
            Some(window) => self.clients.focus(window.id).await,
            None => self.clients.open_window(&entry).await,
        }
        .map_err(WorkerError::Clients)?;
        debug!(tag = %notification.tag, window = window.id, url = %window.url, opened, "Handled notification click");
        Ok(ClickOutcome { window, opened })
    }
}

// ============================================================================
// Tests
// ============================================================================
