//! Error taxonomy for the agent.
//!
//! Transport failures and storage failures are kept separate on purpose:
//! a request that cannot reach the network may still be answered from a
//! store, and a store that cannot be written never blocks a response.

use std::time::Duration;

use thiserror::Error;

/// Transport-level fetch failures.
///
/// An HTTP response with an error status is not an error here: a 4xx/5xx is
/// a valid answer from the application and flows back as a `Response`. Only
/// failing to obtain any response at all lands in this enum.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether this failure looks like lost connectivity rather than a
    /// misbehaving request. Only transient failures fall back to stored
    /// entries and qualify mutations for the retry queue.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) => true,
            FetchError::Network(e) => e.is_timeout() || e.is_connect(),
            FetchError::InvalidUrl(_) => false,
        }
    }
}

/// Failures from a store backend.
///
/// Strategies treat failed reads as cache misses and log-and-swallow failed
/// writes; these errors only propagate from explicit store management calls.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
