//! Request classification.
//!
//! Every intercepted request lands in exactly one route class. Rules are
//! checked in a fixed order and the first match wins; anything the agent has
//! no policy for is passed through untouched, including URLs that do not
//! parse.

use std::sync::Arc;

use url::Url;

use crate::config::AgentConfig;
use crate::http::Request;

/// Route classes, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Sensitive path: proxied, never stored.
    NoStore,
    /// Known third-party host, or traffic with no applicable policy: not
    /// intercepted at all.
    Passthrough,
    /// External image host, served image-first.
    Image,
    /// Same-origin API call, served network-first.
    Api,
    /// Fingerprinted asset, served cache-first.
    StaticAsset,
    /// Top-level page load, served stale-while-revalidate.
    Navigation,
    /// Any other same-origin request, served network-first.
    Dynamic,
}

pub struct Classifier {
    config: Arc<AgentConfig>,
}

impl Classifier {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self { config }
    }

    pub fn classify(&self, request: &Request) -> RouteClass {
        let Ok(url) = Url::parse(&request.url) else {
            return RouteClass::Passthrough;
        };
        let path = url.path();
        let host = url.host_str().unwrap_or("");

        if self
            .config
            .no_store_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()))
        {
            return RouteClass::NoStore;
        }

        if self.config.passthrough_hosts.iter().any(|h| h == host) {
            return RouteClass::Passthrough;
        }

        if self.config.image_hosts.iter().any(|h| h == host) {
            return RouteClass::Image;
        }

        // From here on only the app origin is interesting; cross-origin
        // traffic without a listed host is left to the host environment.
        if url.origin().ascii_serialization() != self.config.app_origin {
            return RouteClass::Passthrough;
        }

        if path.starts_with(&self.config.api_prefix) {
            return RouteClass::Api;
        }

        if self.is_static_path(path) {
            return RouteClass::StaticAsset;
        }

        if request.is_navigation() {
            return RouteClass::Navigation;
        }

        RouteClass::Dynamic
    }

    fn is_static_path(&self, path: &str) -> bool {
        if self
            .config
            .static_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()))
        {
            return true;
        }
        match path.rsplit_once('.') {
            Some((_, ext)) => self.config.static_extensions.iter().any(|e| e == ext),
            None => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
