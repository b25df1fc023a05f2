//! Caching strategies.
//!
//! Four read strategies plus a plain proxy:
//! - network-first for API and dynamic traffic
//! - cache-first for fingerprinted static assets
//! - stale-while-revalidate for navigations
//! - image-first for external image hosts, which never fails outwardly
//!
//! A strategy always settles its response first; store writes happen on
//! spawned tasks so a slow or broken store never delays the caller.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::FetchError;
use crate::fetch::{Fetch, FetchOptions};
use crate::http::{Request, RequestKey, Response};
use crate::store::StoreRegistry;

/// Placeholder image dimensions.
const PLACEHOLDER_WIDTH: u32 = 400;
const PLACEHOLDER_HEIGHT: u32 = 300;

pub struct StrategyExecutor {
    registry: StoreRegistry,
    fetcher: Arc<dyn Fetch>,
    config: Arc<AgentConfig>,
}

impl StrategyExecutor {
    pub fn new(registry: StoreRegistry, fetcher: Arc<dyn Fetch>, config: Arc<AgentConfig>) -> Self {
        Self {
            registry,
            fetcher,
            config,
        }
    }

    /// Network with a bounded wait, stored entry as fallback.
    ///
    /// Any HTTP status is a valid answer; error statuses flow back uncached.
    /// Only transport failures reach for the store, and a navigation with
    /// nothing stored still gets the offline document.
    pub async fn network_first(&self, request: &Request) -> Result<Response, FetchError> {
        let Some(key) = RequestKey::for_request(request) else {
            return self.proxy(request).await;
        };
        let bound = Duration::from_millis(self.config.network_timeout_ms);

        let outcome = match tokio::time::timeout(
            bound,
            self.fetcher.fetch(request, &FetchOptions::default()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(bound)),
        };

        match outcome {
            Ok(response) => {
                if response.is_success() {
                    self.store_async(self.config.dynamic_store(), key, response.clone());
                }
                Ok(response)
            }
            Err(e) if e.is_transient() => {
                debug!(url = %request.url, error = %e, "Network-first falling back to store");
                self.fallback(request, &key).ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Stored entry wins; precache-managed hits refresh behind the response.
    pub async fn cache_first(&self, request: &Request) -> Result<Response, FetchError> {
        let Some(key) = RequestKey::for_request(request) else {
            return self.proxy(request).await;
        };
        let precache = self.config.precache_store();

        if let Some(entry) = self.registry.lookup(&precache, &key) {
            self.refresh_async(request.clone(), key, precache);
            return Ok(entry.response);
        }
        if let Some(entry) = self.registry.lookup(&self.config.dynamic_store(), &key) {
            return Ok(entry.response);
        }

        let response = self
            .fetcher
            .fetch(request, &FetchOptions::default())
            .await?;
        if response.is_success() {
            self.store_async(self.config.dynamic_store(), key, response.clone());
        }
        Ok(response)
    }

    /// Stored entry immediately, network result into the store either way.
    ///
    /// The revalidation fetch is spawned before the stored entry is returned
    /// and is never cancelled; its successful result always lands in the
    /// dynamic store. Without a stored entry the caller waits for it instead.
    pub async fn stale_while_revalidate(&self, request: &Request) -> Result<Response, FetchError> {
        let Some(key) = RequestKey::for_request(request) else {
            return self.proxy(request).await;
        };
        let dynamic = self.config.dynamic_store();
        let precache = self.config.precache_store();
        let cached = self.registry.lookup_any(&[&dynamic, &precache], &key);

        let fetcher = Arc::clone(&self.fetcher);
        let registry = self.registry.clone();
        let fetch_request = request.clone();
        let task_key = key.clone();
        let revalidation = tokio::spawn(async move {
            let result = fetcher.fetch(&fetch_request, &FetchOptions::default()).await;
            if let Ok(response) = &result {
                if response.is_success() {
                    if let Err(e) = registry.put_response(&dynamic, &task_key, response) {
                        warn!(store = dynamic, key = %task_key, error = %e, "Background store write failed");
                    }
                }
            }
            result
        });

        if let Some(entry) = cached {
            return Ok(entry.response);
        }

        match revalidation.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_transient() && request.is_navigation() => {
                self.offline_document().ok_or(e)
            }
            Ok(Err(e)) => Err(e),
            Err(join_error) => {
                warn!(url = %request.url, error = %join_error, "Revalidation task failed");
                Err(FetchError::Connect("revalidation task failed".to_string()))
            }
        }
    }

    /// Network first, stored copy second, placeholder last. Never fails:
    /// a broken image host must not break a rendered page.
    pub async fn image_first(&self, request: &Request) -> Response {
        let key = RequestKey::for_request(request);

        match self.fetcher.fetch(request, &FetchOptions::anonymous()).await {
            Ok(response) if response.is_success() => {
                if let Some(key) = key {
                    self.store_async(self.config.dynamic_store(), key, response.clone());
                }
                response
            }
            Ok(response) => {
                // An error status is useless as an image.
                debug!(url = %request.url, status = response.status, "Image fetch returned error status");
                self.stored_image_or_placeholder(key.as_ref())
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Image fetch failed");
                self.stored_image_or_placeholder(key.as_ref())
            }
        }
    }

    /// Plain forwarding with no store interaction.
    pub async fn proxy(&self, request: &Request) -> Result<Response, FetchError> {
        self.fetcher.fetch(request, &FetchOptions::default()).await
    }

    fn stored_image_or_placeholder(&self, key: Option<&RequestKey>) -> Response {
        key.and_then(|key| self.registry.lookup(&self.config.dynamic_store(), key))
            .map(|entry| entry.response)
            .unwrap_or_else(placeholder_image)
    }

    /// Stored entry for the request, else the offline document for
    /// navigations.
    fn fallback(&self, request: &Request, key: &RequestKey) -> Option<Response> {
        let dynamic = self.config.dynamic_store();
        let precache = self.config.precache_store();
        if let Some(entry) = self.registry.lookup_any(&[&dynamic, &precache], key) {
            return Some(entry.response);
        }
        if request.is_navigation() {
            return self.offline_document();
        }
        None
    }

    /// The precached offline fallback document, if installed.
    fn offline_document(&self) -> Option<Response> {
        let key = RequestKey::for_url(self.config.offline_fallback_url());
        self.registry
            .lookup(&self.config.precache_store(), &key)
            .map(|entry| entry.response)
    }

    /// Fire-and-forget store write; failures are logged, never surfaced.
    fn store_async(&self, store: String, key: RequestKey, response: Response) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.put_response(&store, &key, &response) {
                warn!(store, key = %key, error = %e, "Background store write failed");
            }
        });
    }

    /// Non-blocking refresh of a stored entry; the stored copy stays put
    /// unless the network hands back something usable.
    fn refresh_async(&self, request: Request, key: RequestKey, store: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let registry = self.registry.clone();
        tokio::spawn(async move {
            match fetcher.fetch(&request, &FetchOptions::default()).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = registry.put_response(&store, &key, &response) {
                        warn!(store, key = %key, error = %e, "Background store write failed");
                    }
                }
                Ok(response) => {
                    debug!(key = %key, status = response.status, "Refresh returned error status, keeping stored entry");
                }
                Err(e) => debug!(key = %key, error = %e, "Refresh failed, keeping stored entry"),
            }
        });
    }
}

/// Neutral SVG stand-in so an offline gallery renders without broken tiles.
fn placeholder_image() -> Response {
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="#e2e8f0"/><circle cx="{cx}" cy="{cy}" r="28" fill="#cbd5e1"/></svg>"##,
        w = PLACEHOLDER_WIDTH,
        h = PLACEHOLDER_HEIGHT,
        cx = PLACEHOLDER_WIDTH / 2,
        cy = PLACEHOLDER_HEIGHT / 2,
    );
    Response::new(200)
        .with_header("content-type", "image/svg+xml")
        .with_header("cache-control", "max-age=60")
        .with_body(svg)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use crate::testutil::{eventually, FakeFetch};

    fn executor() -> (StrategyExecutor, Arc<FakeFetch>, StoreRegistry, Arc<AgentConfig>) {
        let config = Arc::new(AgentConfig::default());
        let registry = StoreRegistry::new(Arc::new(MemoryBackend::new()));
        let fetcher = Arc::new(FakeFetch::new());
        let executor = StrategyExecutor::new(
            registry.clone(),
            Arc::clone(&fetcher) as Arc<dyn Fetch>,
            Arc::clone(&config),
        );
        (executor, fetcher, registry, config)
    }

    fn seed(registry: &StoreRegistry, store: &str, url: &str, body: &str) -> RequestKey {
        let key = RequestKey::for_url(url);
        registry
            .put_response(store, &key, &Response::new(200).with_body(body))
            .unwrap();
        key
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // ===== Network-first =====

    #[tokio::test]
    async fn test_network_first_success_returns_and_stores() {
        let (executor, _, registry, config) = executor();
        let url = "https://app.example.com/api/items";

        let response = executor.network_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.status, 200);

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| registry.get_entry(&store, &key).unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn test_network_first_error_status_returned_uncached() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/api/missing";
        fetcher.respond_with(url, Response::new(404).with_body("nope"));

        let response = executor.network_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.status, 404);

        settle().await;
        let key = RequestKey::for_url(url);
        assert!(registry
            .get_entry(&config.dynamic_store(), &key)
            .unwrap()
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_first_timeout_serves_stored_entry() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/api/slow";
        fetcher.hang_url(url);
        seed(&registry, &config.dynamic_store(), url, "stored answer");

        let response = executor.network_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.body, b"stored answer");
    }

    #[tokio::test]
    async fn test_network_first_offline_navigation_gets_fallback_page() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/reports";
        fetcher.fail_url(url);
        seed(
            &registry,
            &config.precache_store(),
            &config.offline_fallback_url(),
            "<html>offline</html>",
        );

        let response = executor
            .network_first(&Request::navigation(url))
            .await
            .unwrap();
        assert_eq!(response.body, b"<html>offline</html>");
    }

    #[tokio::test]
    async fn test_network_first_offline_no_cache_propagates() {
        let (executor, fetcher, _, _) = executor();
        let url = "https://app.example.com/api/items";
        fetcher.fail_url(url);

        let err = executor.network_first(&Request::get(url)).await.unwrap_err();
        assert!(err.is_transient());
    }

    // ===== Cache-first =====

    #[tokio::test]
    async fn test_cache_first_hit_is_byte_identical_and_skips_network() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/assets/app.js";
        seed(&registry, &config.dynamic_store(), url, "cached bytes");

        let response = executor.cache_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.body, b"cached bytes");
        assert_eq!(fetcher.call_count(url), 0);
    }

    #[tokio::test]
    async fn test_cache_first_precache_hit_refreshes_in_background() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/app.css";
        seed(&registry, &config.precache_store(), url, "old css");
        fetcher.respond_with(url, Response::new(200).with_body("new css"));

        let response = executor.cache_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.body, b"old css");

        let key = RequestKey::for_url(url);
        let store = config.precache_store();
        eventually(|| {
            registry
                .get_entry(&store, &key)
                .unwrap()
                .is_some_and(|entry| entry.response.body == b"new css")
        })
        .await;
        assert_eq!(fetcher.call_count(url), 1);
    }

    #[tokio::test]
    async fn test_cache_first_miss_fetches_and_stores() {
        let (executor, _, registry, config) = executor();
        let url = "https://app.example.com/assets/site.css";

        let response = executor.cache_first(&Request::get(url)).await.unwrap();
        assert_eq!(response.status, 200);

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| registry.get_entry(&store, &key).unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn test_cache_first_miss_offline_propagates() {
        let (executor, fetcher, _, _) = executor();
        let url = "https://app.example.com/assets/gone.js";
        fetcher.fail_url(url);

        assert!(executor.cache_first(&Request::get(url)).await.is_err());
    }

    // ===== Stale-while-revalidate =====

    #[tokio::test]
    async fn test_swr_returns_stale_then_next_call_sees_refresh() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/dashboard";
        seed(&registry, &config.dynamic_store(), url, "stale page");
        fetcher.respond_with(url, Response::new(200).with_body("fresh page"));

        let request = Request::navigation(url);
        let first = executor.stale_while_revalidate(&request).await.unwrap();
        assert_eq!(first.body, b"stale page");

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| {
            registry
                .get_entry(&store, &key)
                .unwrap()
                .is_some_and(|entry| entry.response.body == b"fresh page")
        })
        .await;

        let second = executor.stale_while_revalidate(&request).await.unwrap();
        assert_eq!(second.body, b"fresh page");
    }

    #[tokio::test]
    async fn test_swr_miss_waits_for_network() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/fresh-page";
        fetcher.respond_with(url, Response::new(200).with_body("first visit"));

        let response = executor
            .stale_while_revalidate(&Request::navigation(url))
            .await
            .unwrap();
        assert_eq!(response.body, b"first visit");

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| registry.get_entry(&store, &key).unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn test_swr_offline_navigation_gets_fallback_page() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://app.example.com/settings";
        fetcher.fail_url(url);
        seed(
            &registry,
            &config.precache_store(),
            &config.offline_fallback_url(),
            "offline doc",
        );

        let response = executor
            .stale_while_revalidate(&Request::navigation(url))
            .await
            .unwrap();
        assert_eq!(response.body, b"offline doc");
    }

    #[tokio::test]
    async fn test_swr_offline_non_navigation_propagates() {
        let (executor, fetcher, _, _) = executor();
        let url = "https://app.example.com/widget-data";
        fetcher.fail_url(url);

        assert!(executor
            .stale_while_revalidate(&Request::get(url))
            .await
            .is_err());
    }

    // ===== Image-first =====

    #[tokio::test]
    async fn test_image_success_is_anonymous_and_stored() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://images.example-cdn.com/p/1.jpg";

        let request = Request::get(url).with_header("authorization", "Bearer tok");
        let response = executor.image_first(&request).await;
        assert_eq!(response.status, 200);

        let calls = fetcher.calls();
        assert!(calls[0].1.anonymous);

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| registry.get_entry(&store, &key).unwrap().is_some()).await;
    }

    #[tokio::test]
    async fn test_image_round_trip_reuses_stored_bytes_offline() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://images.example-cdn.com/img/a.png";
        fetcher.respond_with(url, Response::new(200).with_body("real png"));

        let online = executor.image_first(&Request::get(url)).await;
        assert_eq!(online.body, b"real png");

        let key = RequestKey::for_url(url);
        let store = config.dynamic_store();
        eventually(|| registry.get_entry(&store, &key).unwrap().is_some()).await;

        fetcher.go_offline();
        let offline = executor.image_first(&Request::get(url)).await;
        assert_eq!(offline.body, b"real png");
    }

    #[tokio::test]
    async fn test_image_failure_serves_stored_copy() {
        let (executor, fetcher, registry, config) = executor();
        let url = "https://images.example-cdn.com/p/2.jpg";
        seed(&registry, &config.dynamic_store(), url, "jpeg bytes");
        fetcher.fail_url(url);

        let response = executor.image_first(&Request::get(url)).await;
        assert_eq!(response.body, b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_image_failure_no_cache_synthesizes_placeholder() {
        let (executor, fetcher, _, _) = executor();
        let url = "https://images.example-cdn.com/p/3.jpg";
        fetcher.fail_url(url);

        let response = executor.image_first(&Request::get(url)).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("image/svg+xml"));
        assert!(String::from_utf8_lossy(&response.body).contains("<svg"));
    }

    #[tokio::test]
    async fn test_image_error_status_also_gets_placeholder() {
        let (executor, fetcher, _, _) = executor();
        let url = "https://images.example-cdn.com/p/4.jpg";
        fetcher.respond_with(url, Response::new(404));

        let response = executor.image_first(&Request::get(url)).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("image/svg+xml"));
    }

    // ===== Proxy =====

    #[tokio::test]
    async fn test_proxy_never_touches_stores() {
        let (executor, _, registry, _) = executor();
        let url = "https://app.example.com/api/auth/session";

        executor.proxy(&Request::get(url)).await.unwrap();
        settle().await;
        assert!(registry.list_stores().unwrap().is_empty());
    }
}
