//! The assembled agent.
//!
//! Wires the classifier, strategies, retry queue, lifecycle, client hub and
//! notification dispatcher behind one handle. All dependencies come in
//! through `new`; nothing here reaches for globals, so tests swap the
//! backend and fetcher for in-memory doubles.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classify::{Classifier, RouteClass};
use crate::clients::{ClientHub, ClientMessage};
use crate::config::AgentConfig;
use crate::control::{ControlMessage, ControlReply};
use crate::error::FetchError;
use crate::fetch::Fetch;
use crate::http::{Request, Response};
use crate::lifecycle::Lifecycle;
use crate::notify::{NotificationDispatcher, NotificationRecord, NotificationSink};
use crate::queue::{DrainOutcome, RetryQueue};
use crate::store::{StoreBackend, StoreRegistry};
use crate::strategy::StrategyExecutor;

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not ours; let the request go out untouched.
    Bypass,
    /// Serve this response.
    Response(Response),
}

/// What a logout teardown managed to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub notified_clients: usize,
}

pub struct Agent {
    config: Arc<AgentConfig>,
    registry: StoreRegistry,
    classifier: Classifier,
    strategies: StrategyExecutor,
    queue: RetryQueue,
    lifecycle: Lifecycle,
    hub: Arc<ClientHub>,
    dispatcher: NotificationDispatcher,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn StoreBackend>,
        fetcher: Arc<dyn Fetch>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = StoreRegistry::new(backend);
        let hub = Arc::new(ClientHub::new());
        Self {
            classifier: Classifier::new(Arc::clone(&config)),
            strategies: StrategyExecutor::new(
                registry.clone(),
                Arc::clone(&fetcher),
                Arc::clone(&config),
            ),
            queue: RetryQueue::new(registry.clone(), Arc::clone(&fetcher)),
            lifecycle: Lifecycle::new(registry.clone(), Arc::clone(&fetcher), Arc::clone(&config)),
            dispatcher: NotificationDispatcher::new(
                sink,
                Arc::clone(&hub),
                fetcher,
                Arc::clone(&config),
            ),
            registry,
            hub,
            config,
        }
    }

    // ===== Request interception =====

    /// Route one intercepted request.
    ///
    /// Mutating methods in any cacheable class go to the network; with the
    /// `defer_on_failure` opt-in, a transport failure parks the request in
    /// the retry queue and answers 202 instead of erroring.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, FetchError> {
        let class = self.classifier.classify(request);
        debug!(method = %request.method, url = %request.url, ?class, "Routing request");
        match class {
            RouteClass::Passthrough => Ok(FetchOutcome::Bypass),
            RouteClass::NoStore => self
                .strategies
                .proxy(request)
                .await
                .map(FetchOutcome::Response),
            _ if !request.method.is_safe() => self
                .forward_mutation(request)
                .await
                .map(FetchOutcome::Response),
            RouteClass::Api | RouteClass::Dynamic => self
                .strategies
                .network_first(request)
                .await
                .map(FetchOutcome::Response),
            RouteClass::StaticAsset => self
                .strategies
                .cache_first(request)
                .await
                .map(FetchOutcome::Response),
            RouteClass::Navigation => self
                .strategies
                .stale_while_revalidate(request)
                .await
                .map(FetchOutcome::Response),
            RouteClass::Image => Ok(FetchOutcome::Response(
                self.strategies.image_first(request).await,
            )),
        }
    }

    async fn forward_mutation(&self, request: &Request) -> Result<Response, FetchError> {
        match self.strategies.proxy(request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_transient() && request.defer_on_failure => {
                let mutation = match self.queue.enqueue(request) {
                    Ok(mutation) => mutation,
                    Err(store_err) => {
                        warn!(url = %request.url, error = %store_err, "Could not queue mutation");
                        return Err(e);
                    }
                };
                info!(url = %request.url, id = %mutation.id, "Network down, mutation queued");
                Ok(queued_response(&mutation.id))
            }
            Err(e) => Err(e),
        }
    }

    // ===== Triggers =====

    /// Connectivity came back: drain the queue, one notification per
    /// replayed mutation.
    pub async fn on_reconnect(&self) -> DrainOutcome {
        let outcome = self.queue.drain().await;
        for mutation in &outcome.replayed {
            let record = self.dispatcher.sync_success(&mutation.request.url);
            self.dispatcher.show(&record);
        }
        outcome
    }

    /// Push payload arrived; returns the record that was shown.
    pub fn handle_push(&self, payload: &[u8]) -> NotificationRecord {
        self.dispatcher.show_payload(payload)
    }

    pub fn notification_interaction(&self, action: &str, record: &NotificationRecord) {
        self.dispatcher.on_interaction(action, record);
    }

    // ===== Control channel =====

    pub async fn handle_control(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::CacheUrls { urls } => {
                let warmed = self.lifecycle.warm(&urls).await;
                info!(requested = urls.len(), warmed, "CACHE_URLS handled");
                ControlReply::Ack
            }
            ControlMessage::ClearCache { name: Some(name) } => {
                // Deleting an absent store is a no-op, same as a delete that
                // found nothing.
                match self.registry.delete_store(&name) {
                    Ok(_) => {
                        info!(store = %name, "Store cleared");
                        ControlReply::Ack
                    }
                    Err(e) => ControlReply::Error {
                        message: e.to_string(),
                    },
                }
            }
            ControlMessage::ClearCache { name: None } => match self.registry.list_stores() {
                Ok(stores) => {
                    for store in stores {
                        if let Err(e) = self.registry.delete_store(&store) {
                            warn!(store = %store, error = %e, "Could not clear store");
                        }
                    }
                    info!("All stores cleared");
                    ControlReply::Ack
                }
                Err(e) => ControlReply::Error {
                    message: e.to_string(),
                },
            },
            ControlMessage::GetCacheSize => match self.registry.size_bytes() {
                Ok(bytes) => ControlReply::CacheSize { bytes },
                Err(e) => ControlReply::Error {
                    message: e.to_string(),
                },
            },
            ControlMessage::Logout => {
                self.logout().await;
                ControlReply::Ack
            }
            ControlMessage::SkipWaiting => {
                self.lifecycle.skip_waiting();
                ControlReply::Ack
            }
        }
    }

    /// Logout teardown: delete every store, then tell every client to drop
    /// its auth state.
    ///
    /// Deletions run concurrently off the async threads and are all joined
    /// before the broadcast, so clients hear `CLEAR_AUTH_DATA` only once and
    /// only after the stores are gone. Failures are logged and skipped;
    /// the broadcast happens regardless.
    pub async fn logout(&self) -> TeardownReport {
        info!("Logout teardown starting");
        let stores = match self.registry.list_stores() {
            Ok(stores) => stores,
            Err(e) => {
                warn!(error = %e, "Could not list stores for teardown");
                Vec::new()
            }
        };

        let mut report = TeardownReport::default();
        let mut deletions = Vec::with_capacity(stores.len());
        for store in stores {
            let registry = self.registry.clone();
            deletions.push(tokio::task::spawn_blocking(move || {
                let outcome = registry.delete_store(&store);
                (store, outcome)
            }));
        }
        for deletion in deletions {
            match deletion.await {
                Ok((store, Ok(_))) => report.deleted.push(store),
                Ok((store, Err(e))) => {
                    warn!(store = %store, error = %e, "Teardown could not delete store");
                    report.failed.push(store);
                }
                Err(e) => warn!(error = %e, "Teardown task failed"),
            }
        }

        let message = ClientMessage::ClearAuthData {
            keys: self.config.auth_state_keys.clone(),
        };
        report.notified_clients = self.hub.broadcast(&message);
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            clients = report.notified_clients,
            "Logout teardown finished"
        );
        report
    }

    // ===== Accessors for the daemon =====

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }
}

fn queued_response(id: &str) -> Response {
    let body = serde_json::json!({ "queued": true, "id": id });
    Response::new(202)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
}

// ============================================================================
// Tests
// ============================================================================
