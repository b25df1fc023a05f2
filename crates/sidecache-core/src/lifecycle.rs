//! Install, activation, and periodic maintenance.
//!
//! A generation is the pair of versioned stores named after
//! `cache_version`. Install fills the new precache store, activation retires
//! every store that is not part of the current generation, and maintenance
//! keeps the dynamic store warm and bounded.

use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::fetch::{Fetch, FetchOptions};
use crate::http::{Request, RequestKey, Response};
use crate::queue::MUTATION_STORE;
use crate::store::StoreRegistry;

/// Precache and warm downloads in flight at once.
const FETCH_CONCURRENCY: usize = 4;

/// Where the agent is in its install/activate handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Installing,
    /// Precache populated, old generation still serving.
    Installed,
    Activating,
    Active,
}

/// Per-URL outcome of an install pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub warmed: usize,
    pub evicted: usize,
}

pub struct Lifecycle {
    registry: StoreRegistry,
    fetcher: Arc<dyn Fetch>,
    config: Arc<AgentConfig>,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub fn new(registry: StoreRegistry, fetcher: Arc<dyn Fetch>, config: Arc<AgentConfig>) -> Self {
        Self {
            registry,
            fetcher,
            config,
            state: Mutex::new(LifecycleState::Idle),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
        debug!(state = ?next, "Lifecycle state changed");
    }

    /// Populate the current precache store from the manifest.
    ///
    /// Best-effort: each path is fetched against the app origin with bounded
    /// concurrency, failures are warned and reported but never abort the
    /// pass. Ends in `Installed` regardless.
    pub async fn install(&self) -> InstallReport {
        self.set_state(LifecycleState::Installing);
        let store = self.config.precache_store();
        info!(
            store = %store,
            paths = self.config.precache_manifest.len(),
            "Installing"
        );
        if let Err(e) = self.registry.open(&store) {
            warn!(store = %store, error = %e, "Could not open precache store");
        }

        // The buffered futures own everything they touch so the whole pass
        // stays spawnable from the daemon's tasks.
        let urls: Vec<String> = self
            .config
            .precache_manifest
            .iter()
            .map(|path| self.config.origin_url(path))
            .collect();
        let fetcher = Arc::clone(&self.fetcher);
        let results: Vec<(String, Option<Response>)> = stream::iter(urls)
            .map(move |url| {
                let fetcher = Arc::clone(&fetcher);
                async move {
                    let request = Request::get(&url);
                    match fetcher.fetch(&request, &FetchOptions::default()).await {
                        Ok(response) if response.is_success() => (url, Some(response)),
                        Ok(response) => {
                            warn!(url = %url, status = response.status, "Precache fetch rejected");
                            (url, None)
                        }
                        Err(e) => {
                            warn!(url = %url, error = %e, "Precache fetch failed");
                            (url, None)
                        }
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut report = InstallReport::default();
        for (url, response) in results {
            match response {
                Some(response) => {
                    let key = RequestKey::for_url(&url);
                    match self.registry.put_response(&store, &key, &response) {
                        Ok(()) => report.cached.push(url),
                        Err(e) => {
                            warn!(url = %url, error = %e, "Precache write failed");
                            report.failed.push(url);
                        }
                    }
                }
                None => report.failed.push(url),
            }
        }
        // buffer_unordered scrambles completion order.
        report.cached.sort();
        report.failed.sort();

        self.set_state(LifecycleState::Installed);
        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Install finished"
        );
        report
    }

    /// Promote the current generation and retire every other store.
    ///
    /// The current stores are opened before anything is deleted, so there is
    /// no window where no store exists. The mutation queue store is
    /// unversioned and survives activation.
    pub fn activate(&self) {
        self.set_state(LifecycleState::Activating);
        let precache = self.config.precache_store();
        let dynamic = self.config.dynamic_store();
        for store in [&precache, &dynamic] {
            if let Err(e) = self.registry.open(store) {
                warn!(store = %store, error = %e, "Could not open store");
            }
        }

        let keep = [precache.as_str(), dynamic.as_str(), MUTATION_STORE];
        match self.registry.list_stores() {
            Ok(stores) => {
                for stale in stores.iter().filter(|s| !keep.contains(&s.as_str())) {
                    match self.registry.delete_store(stale) {
                        Ok(_) => info!(store = %stale, "Deleted stale store"),
                        Err(e) => {
                            warn!(store = %stale, error = %e, "Could not delete stale store")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not list stores during activation"),
        }
        self.set_state(LifecycleState::Active);
        info!(precache = %precache, dynamic = %dynamic, "Activated");
    }

    /// Activate immediately when an installed generation is waiting.
    pub fn skip_waiting(&self) -> bool {
        if self.state() != LifecycleState::Installed {
            debug!(state = ?self.state(), "skip_waiting ignored");
            return false;
        }
        self.activate();
        true
    }

    /// Fetch each URL and store successes in the dynamic store. Returns how
    /// many were cached. Shared by the CACHE_URLS verb and maintenance.
    pub async fn warm(&self, urls: &[String]) -> usize {
        if urls.is_empty() {
            return 0;
        }
        // Owned captures, same as install: keeps the pass spawnable.
        let store = self.config.dynamic_store();
        let fetcher = Arc::clone(&self.fetcher);
        let registry = self.registry.clone();
        let outcomes: Vec<bool> = stream::iter(urls.to_vec())
            .map(move |url| {
                let store = store.clone();
                let fetcher = Arc::clone(&fetcher);
                let registry = registry.clone();
                async move {
                    let request = Request::get(&url);
                    let response = match fetcher.fetch(&request, &FetchOptions::default()).await {
                        Ok(response) if response.is_success() => response,
                        Ok(response) => {
                            debug!(url = %url, status = response.status, "Warm fetch rejected");
                            return false;
                        }
                        Err(e) => {
                            debug!(url = %url, error = %e, "Warm fetch failed");
                            return false;
                        }
                    };
                    let key = RequestKey::for_url(&url);
                    match registry.put_response(&store, &key, &response) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(url = %url, error = %e, "Warm write failed");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;
        outcomes.into_iter().filter(|cached| *cached).count()
    }

    /// Daily pass: pre-warm the important URLs, then evict dynamic entries
    /// past the retention window.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let warmed = self.warm(&self.config.important_urls).await;
        let evicted = self.evict_expired();
        info!(warmed, evicted, "Maintenance pass finished");
        MaintenanceReport { warmed, evicted }
    }

    fn evict_expired(&self) -> usize {
        let store = self.config.dynamic_store();
        let entries = match self.registry.entries(&store) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(store = %store, error = %e, "Could not scan dynamic store");
                return 0;
            }
        };
        let mut evicted = 0;
        for entry in entries {
            if entry.age_days() < self.config.retention_days {
                continue;
            }
            match self.registry.remove_entry(&store, &entry.key) {
                Ok(_) => evicted += 1,
                Err(e) => warn!(key = %entry.key, error = %e, "Could not evict entry"),
            }
        }
        if evicted > 0 {
            info!(evicted, store = %store, "Evicted expired entries");
        }
        evicted
    }
}

// ============================================================================
// Tests
// ============================================================================
