//! Agent configuration.
//!
//! The routing tables (sensitive path prefixes, third-party hosts, image
//! hosts, static asset rules), the precache manifest, and the agent's timing
//! knobs all live here so the rest of the crate is policy-free.
//!
//! Configuration is stored at `~/.config/sidecache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sidecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Dynamic entries older than this are evicted during maintenance.
/// A week keeps the opportunistic cache useful across short trips offline
/// without letting it grow stale indefinitely.
const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Network-first gives the network this long before falling back to cache.
/// 3 seconds keeps degraded connections from stalling page data.
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin the agent fronts, e.g. `https://app.example.com`.
    pub app_origin: String,
    /// Version stamp baked into versioned store names.
    pub cache_version: String,
    /// Same-origin path prefix served network-first as API traffic.
    pub api_prefix: String,
    /// Sensitive path prefixes that are proxied but never stored.
    pub no_store_prefixes: Vec<String>,
    /// Third-party hosts the agent does not intercept at all.
    pub passthrough_hosts: Vec<String>,
    /// External hosts serving user-visible images.
    pub image_hosts: Vec<String>,
    /// Same-origin prefixes holding fingerprinted static assets.
    pub static_prefixes: Vec<String>,
    /// File extensions treated as static assets anywhere on the origin.
    pub static_extensions: Vec<String>,
    /// Paths fetched into the precache store at install time.
    pub precache_manifest: Vec<String>,
    /// Document served when a navigation fails with nothing cached.
    pub offline_fallback_path: String,
    /// URLs pre-warmed into the dynamic store by daily maintenance.
    pub important_urls: Vec<String>,
    /// Client-side session state keys cleared on logout.
    pub auth_state_keys: Vec<String>,
    pub network_timeout_ms: u64,
    pub retention_days: i64,
    /// Notification interaction reporting endpoint, if any.
    pub analytics_url: Option<String>,
    /// Control socket listen address for the daemon.
    pub control_addr: String,
    /// Fallback notification title for malformed push payloads.
    pub notification_title: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_origin: "https://app.example.com".to_string(),
            cache_version: "v1".to_string(),
            api_prefix: "/api/".to_string(),
            no_store_prefixes: vec![
                "/api/auth/".to_string(),
                "/api/payments/".to_string(),
            ],
            passthrough_hosts: vec![
                "js.stripe.com".to_string(),
                "www.googletagmanager.com".to_string(),
            ],
            image_hosts: vec!["images.example-cdn.com".to_string()],
            static_prefixes: vec!["/assets/".to_string(), "/static/".to_string()],
            static_extensions: vec![
                "js".to_string(),
                "css".to_string(),
                "woff2".to_string(),
                "png".to_string(),
                "svg".to_string(),
                "ico".to_string(),
            ],
            precache_manifest: vec![
                "/".to_string(),
                "/offline.html".to_string(),
                "/manifest.json".to_string(),
            ],
            offline_fallback_path: "/offline.html".to_string(),
            important_urls: Vec::new(),
            auth_state_keys: vec![
                "access_token".to_string(),
                "refresh_token".to_string(),
                "user_profile".to_string(),
                "session_expiry".to_string(),
            ],
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            analytics_url: None,
            control_addr: "127.0.0.1:7171".to_string(),
            notification_title: "Sidecache".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from the default path, falling back to defaults when the file is
    /// absent or unreadable. A broken config file should not keep the agent
    /// from starting.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Ok(Self::load_from(&path))
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|contents| Ok(serde_json::from_str(&contents)?))
        {
            Ok(config) => config,
            Err(e) => {
                warn!(?path, error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Name of the versioned precache store.
    pub fn precache_store(&self) -> String {
        format!("precache-{}", self.cache_version)
    }

    /// Name of the versioned dynamic store.
    pub fn dynamic_store(&self) -> String {
        format!("dynamic-{}", self.cache_version)
    }

    /// Absolute URL of the offline fallback document.
    pub fn offline_fallback_url(&self) -> String {
        format!("{}{}", self.app_origin, self.offline_fallback_path)
    }

    /// Absolute URL for a same-origin path.
    pub fn origin_url(&self, path: &str) -> String {
        format!("{}{}", self.app_origin, path)
    }
}

// ============================================================================
// Tests
// ============================================================================
