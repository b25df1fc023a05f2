//! Control-channel wire messages.
//!
//! Host surfaces drive the agent over a small JSON protocol: each frame is
//! one tagged object. Malformed frames are dropped at the parse boundary so
//! a bad client cannot wedge the agent.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inbound control verbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Pre-warm the dynamic store with the given URLs.
    CacheUrls { urls: Vec<String> },
    /// Delete one named store, or every store when no name is given.
    ClearCache {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Report total bytes held across all stores.
    GetCacheSize,
    /// Tear down caches and broadcast the auth-clearing message.
    Logout,
    /// Activate a waiting installed generation immediately.
    SkipWaiting,
}

impl ControlMessage {
    /// Parse one control frame. Malformed input is logged and dropped; the
    /// caller answers with an error reply but takes no action.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice(bytes) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Dropping malformed control message");
                None
            }
        }
    }
}

/// Outbound replies, one per inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    Ack,
    CacheSize { bytes: u64 },
    Error { message: String },
}

// ============================================================================
// Tests
// ============================================================================
