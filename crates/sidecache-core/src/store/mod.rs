//! Versioned key-value stores for response bodies and queued work.
//!
//! A `StoreBackend` is a set of named stores, each a flat map of string keys
//! to opaque byte values. `StoreRegistry` layers the agent's typing on top:
//! cached entries stamped at write time, JSON codecs for queued mutations,
//! and the write guards the routing invariants rely on.

pub mod disk;
pub mod memory;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::http::{RequestKey, Response};

/// One stored response, stamped at write time.
///
/// Entries are replaced wholesale on overwrite, so `stored_at` always
/// reflects the latest write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub key: RequestKey,
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.stored_at).num_days()
    }
}

/// A set of named byte stores.
///
/// Object-safe on purpose: the registry hands `Arc<dyn StoreBackend>` to
/// fire-and-forget write tasks. Absent stores read as empty rather than
/// erroring, so lookups racing activation degrade to misses.
pub trait StoreBackend: Send + Sync {
    /// Create the store if it does not exist. Idempotent.
    fn create(&self, store: &str) -> Result<(), StoreError>;
    /// Overwrite the value under `key`, creating the store on demand.
    fn put(&self, store: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// Remove one entry; `Ok(true)` when something was deleted.
    fn remove(&self, store: &str, key: &str) -> Result<bool, StoreError>;
    /// All entries of a store in ascending key order.
    fn entries(&self, store: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
    /// Drop a whole store; `Ok(true)` when it existed.
    fn remove_store(&self, store: &str) -> Result<bool, StoreError>;
    fn store_names(&self) -> Result<Vec<String>, StoreError>;
    /// Total stored bytes across all stores.
    fn size_bytes(&self) -> Result<u64, StoreError>;
}

/// Typed facade over a backend, shared by every component.
/// Clone is cheap - the backend sits behind an Arc.
#[derive(Clone)]
pub struct StoreRegistry {
    backend: Arc<dyn StoreBackend>,
}

impl StoreRegistry {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn StoreBackend> {
        Arc::clone(&self.backend)
    }

    /// Open (create if missing) a named store.
    pub fn open(&self, store: &str) -> Result<(), StoreError> {
        self.backend.create(store)
    }

    /// Store a response under its request key, stamping `stored_at`.
    ///
    /// Responses to non-safe methods are refused outright: nothing mutating
    /// is ever written to a store.
    pub fn put_response(
        &self,
        store: &str,
        key: &RequestKey,
        response: &Response,
    ) -> Result<(), StoreError> {
        if !key.method.is_safe() {
            warn!(store, key = %key, "Refusing to store response to non-safe method");
            return Ok(());
        }
        let entry = CachedEntry::new(key.clone(), response.clone());
        let bytes = serde_json::to_vec(&entry)?;
        self.backend.put(store, &key.storage_key(), &bytes)
    }

    pub fn get_entry(
        &self,
        store: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StoreError> {
        match self.backend.get(store, &key.storage_key())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lookup with reads degraded to misses. This is what strategies use on
    /// their fallback paths; a broken store must never break a response.
    pub fn lookup(&self, store: &str, key: &RequestKey) -> Option<CachedEntry> {
        match self.get_entry(store, key) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(store, key = %key, error = %e, "Store read failed, treating as miss");
                None
            }
        }
    }

    /// First hit across `stores`, in order.
    pub fn lookup_any(&self, stores: &[&str], key: &RequestKey) -> Option<CachedEntry> {
        stores.iter().find_map(|store| self.lookup(store, key))
    }

    pub fn remove_entry(&self, store: &str, key: &RequestKey) -> Result<bool, StoreError> {
        self.backend.remove(store, &key.storage_key())
    }

    /// Decoded entries of a store. Values that no longer decode are skipped
    /// with a log entry rather than failing the whole listing.
    pub fn entries(&self, store: &str) -> Result<Vec<CachedEntry>, StoreError> {
        let mut decoded = Vec::new();
        for (key, bytes) in self.backend.entries(store)? {
            match serde_json::from_slice(&bytes) {
                Ok(entry) => decoded.push(entry),
                Err(e) => warn!(store, key, error = %e, "Skipping undecodable store entry"),
            }
        }
        Ok(decoded)
    }

    // ===== JSON codec access for non-response values =====

    pub fn put_json<T: Serialize>(
        &self,
        store: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.backend.put(store, key, &serde_json::to_vec(value)?)
    }

    pub fn entries_json<T: DeserializeOwned>(&self, store: &str) -> Result<Vec<T>, StoreError> {
        let mut decoded = Vec::new();
        for (key, bytes) in self.backend.entries(store)? {
            match serde_json::from_slice(&bytes) {
                Ok(value) => decoded.push(value),
                Err(e) => warn!(store, key, error = %e, "Skipping undecodable store entry"),
            }
        }
        Ok(decoded)
    }

    pub fn remove_key(&self, store: &str, key: &str) -> Result<bool, StoreError> {
        self.backend.remove(store, key)
    }

    // ===== Store management =====

    pub fn delete_store(&self, store: &str) -> Result<bool, StoreError> {
        self.backend.remove_store(store)
    }

    pub fn list_stores(&self) -> Result<Vec<String>, StoreError> {
        self.backend.store_names()
    }

    pub fn size_bytes(&self) -> Result<u64, StoreError> {
        self.backend.size_bytes()
    }
}

// ============================================================================
// Tests
// ============================================================================
