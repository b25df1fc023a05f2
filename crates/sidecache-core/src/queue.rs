//! Retry queue for mutations that failed offline.
//!
//! Mutating requests whose callers opted into deferred delivery are parked
//! in a dedicated store and replayed when connectivity returns. The queue
//! store is unversioned: it survives agent upgrades, and entries only leave
//! it through successful replay or an explicit purge.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::fetch::{Fetch, FetchOptions};
use crate::http::Request;
use crate::store::StoreRegistry;

/// Name of the queue's store. Deliberately unversioned; see `Lifecycle`.
pub const MUTATION_STORE: &str = "offline-mutations";

/// One parked mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: String,
    pub request: Request,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl QueuedMutation {
    pub fn new(request: Request) -> Self {
        let now = Utc::now();
        // Zero-padded millis then a uuid: lexicographic id order is enqueue
        // order, and collisions within one millisecond still get unique keys.
        let id = format!("{:020}-{}", now.timestamp_millis(), Uuid::new_v4());
        Self {
            id,
            request,
            enqueued_at: now,
            attempts: 0,
        }
    }
}

/// Result of one drain pass.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    pub replayed: Vec<QueuedMutation>,
    pub failed: Vec<QueuedMutation>,
    /// True when another pass was already running and this trigger was
    /// coalesced into it.
    pub skipped: bool,
}

impl DrainOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct RetryQueue {
    registry: StoreRegistry,
    fetcher: Arc<dyn Fetch>,
    drain_lock: Mutex<()>,
}

impl RetryQueue {
    pub fn new(registry: StoreRegistry, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            registry,
            fetcher,
            drain_lock: Mutex::new(()),
        }
    }

    /// Park a mutation for later replay. The queue store is created on first
    /// use.
    pub fn enqueue(&self, request: &Request) -> Result<QueuedMutation, StoreError> {
        let mutation = QueuedMutation::new(request.clone());
        self.registry
            .put_json(MUTATION_STORE, &mutation.id, &mutation)?;
        info!(id = %mutation.id, url = %request.url, "Queued offline mutation");
        Ok(mutation)
    }

    /// Pending mutations in enqueue order.
    pub fn pending(&self) -> Result<Vec<QueuedMutation>, StoreError> {
        let mut pending: Vec<QueuedMutation> = self.registry.entries_json(MUTATION_STORE)?;
        pending.sort_by(|a, b| (a.enqueued_at, &a.id).cmp(&(b.enqueued_at, &b.id)));
        Ok(pending)
    }

    pub fn has_pending(&self) -> Result<bool, StoreError> {
        Ok(!self.pending()?.is_empty())
    }

    /// Drop the whole queue.
    pub fn clear(&self) -> Result<bool, StoreError> {
        self.registry.delete_store(MUTATION_STORE)
    }

    /// Replay parked mutations, oldest first, one attempt each.
    ///
    /// Single-flight: a trigger that arrives while a pass is running returns
    /// `skipped` and leaves the running pass to finish. The pass works from a
    /// snapshot taken at entry, so mutations enqueued mid-pass wait for the
    /// next trigger. A replay counts as delivered on any HTTP status; only
    /// transport failures keep the entry for another pass.
    pub async fn drain(&self) -> DrainOutcome {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            debug!("Drain already running, coalescing trigger");
            return DrainOutcome::skipped();
        };

        let snapshot = match self.pending() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not read retry queue");
                return DrainOutcome::default();
            }
        };
        if snapshot.is_empty() {
            return DrainOutcome::default();
        }

        info!(count = snapshot.len(), "Replaying queued mutations");
        let mut outcome = DrainOutcome::default();
        for mutation in snapshot {
            match self
                .fetcher
                .fetch(&mutation.request, &FetchOptions::default())
                .await
            {
                Ok(response) => {
                    // Delivered; any status is an answer from the application.
                    debug!(id = %mutation.id, status = response.status, "Queued mutation replayed");
                    if let Err(e) = self.registry.remove_key(MUTATION_STORE, &mutation.id) {
                        warn!(id = %mutation.id, error = %e, "Replayed mutation could not be removed");
                    }
                    outcome.replayed.push(mutation);
                }
                Err(e) => {
                    debug!(id = %mutation.id, error = %e, "Replay failed, keeping mutation");
                    let mut kept = mutation;
                    kept.attempts += 1;
                    if let Err(e) = self.registry.put_json(MUTATION_STORE, &kept.id, &kept) {
                        warn!(id = %kept.id, error = %e, "Could not record replay attempt");
                    }
                    outcome.failed.push(kept);
                }
            }
        }
        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, Response};
    use crate::store::MemoryBackend;
    use crate::testutil::FakeFetch;

    fn queue() -> (Arc<RetryQueue>, Arc<FakeFetch>, StoreRegistry) {
        let registry = StoreRegistry::new(Arc::new(MemoryBackend::new()));
        let fetcher = Arc::new(FakeFetch::new());
        let queue = Arc::new(RetryQueue::new(
            registry.clone(),
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
        ));
        (queue, fetcher, registry)
    }

    fn post(url: &str) -> Request {
        Request::get(url)
            .with_method(Method::Post)
            .with_body(r#"{"v":1}"#)
            .deferrable()
    }

    #[tokio::test]
    async fn test_enqueue_persists_in_fifo_order() {
        let (queue, _, _) = queue();
        queue.enqueue(&post("https://app.example.com/api/a")).unwrap();
        queue.enqueue(&post("https://app.example.com/api/b")).unwrap();
        queue.enqueue(&post("https://app.example.com/api/c")).unwrap();

        let urls: Vec<String> = queue
            .pending()
            .unwrap()
            .into_iter()
            .map(|m| m.request.url)
            .collect();
        assert_eq!(
            urls,
            [
                "https://app.example.com/api/a",
                "https://app.example.com/api/b",
                "https://app.example.com/api/c",
            ]
        );
    }

    #[tokio::test]
    async fn test_drain_removes_replayed_and_keeps_failed() {
        let (queue, fetcher, _) = queue();
        queue.enqueue(&post("https://app.example.com/api/1")).unwrap();
        queue.enqueue(&post("https://app.example.com/api/2")).unwrap();
        queue.enqueue(&post("https://app.example.com/api/3")).unwrap();
        fetcher.fail_url("https://app.example.com/api/2");

        let outcome = queue.drain().await;
        assert_eq!(outcome.replayed.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(!outcome.skipped);

        let pending = queue.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request.url, "https://app.example.com/api/2");
        assert_eq!(pending[0].attempts, 1);

        // Connectivity back for everything: the second pass clears it.
        fetcher.heal_url("https://app.example.com/api/2");
        let second = queue.drain().await;
        assert_eq!(second.replayed.len(), 1);
        assert!(!queue.has_pending().unwrap());
    }

    #[tokio::test]
    async fn test_replay_counts_error_status_as_delivered() {
        let (queue, fetcher, _) = queue();
        let url = "https://app.example.com/api/conflict";
        queue.enqueue(&post(url)).unwrap();
        fetcher.respond_with(url, Response::new(409));

        let outcome = queue.drain().await;
        assert_eq!(outcome.replayed.len(), 1);
        assert!(!queue.has_pending().unwrap());
    }

    #[tokio::test]
    async fn test_each_pass_attempts_each_entry_once() {
        let (queue, fetcher, _) = queue();
        let url = "https://app.example.com/api/down";
        queue.enqueue(&post(url)).unwrap();
        fetcher.fail_url(url);

        queue.drain().await;
        queue.drain().await;

        assert_eq!(fetcher.call_count(url), 2);
        assert_eq!(queue.pending().unwrap()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_is_quiet() {
        let (queue, fetcher, _) = queue();
        let outcome = queue.drain().await;
        assert!(outcome.replayed.is_empty());
        assert!(outcome.failed.is_empty());
        assert!(!outcome.skipped);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_drains_coalesce() {
        let (queue, fetcher, _) = queue();
        let url = "https://app.example.com/api/stuck";
        queue.enqueue(&post(url)).unwrap();
        fetcher.hang_url(url);

        let background = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.drain().await }
        });
        // Let the first pass take the lock and block on its fetch.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let second = queue.drain().await;
        assert!(second.skipped);
        background.abort();
    }

    #[tokio::test]
    async fn test_clear_drops_queue_store() {
        let (queue, _, registry) = queue();
        queue.enqueue(&post("https://app.example.com/api/x")).unwrap();
        assert!(queue.clear().unwrap());
        assert!(!queue.has_pending().unwrap());
        assert!(!registry
            .list_stores()
            .unwrap()
            .contains(&MUTATION_STORE.to_string()));
    }
}
