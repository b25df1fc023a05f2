//! In-memory store backend for tests and embedders.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::StoreError;

use super::StoreBackend;

type Entries = BTreeMap<String, Vec<u8>>;

/// Backend keeping every store in process memory.
///
/// Entry maps are `BTreeMap`s so `entries` comes back in ascending key
/// order, which the retry queue's sortable ids rely on.
#[derive(Default)]
pub struct MemoryBackend {
    stores: RwLock<HashMap<String, Entries>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entries>> {
        self.stores.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entries>> {
        self.stores.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StoreBackend for MemoryBackend {
    fn create(&self, store: &str) -> Result<(), StoreError> {
        self.write().entry(store.to_string()).or_default();
        Ok(())
    }

    fn put(&self, store: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write()
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .read()
            .get(store)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn remove(&self, store: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .write()
            .get_mut(store)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false))
    }

    fn entries(&self, store: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .read()
            .get(store)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn remove_store(&self, store: &str) -> Result<bool, StoreError> {
        Ok(self.write().remove(store).is_some())
    }

    fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn size_bytes(&self) -> Result<u64, StoreError> {
        Ok(self
            .read()
            .values()
            .flat_map(|entries| entries.values())
            .map(|value| value.len() as u64)
            .sum())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let backend = MemoryBackend::new();
        backend.put("s", "k", b"value").unwrap();
        assert_eq!(backend.get("s", "k").unwrap().as_deref(), Some(&b"value"[..]));
        assert!(backend.remove("s", "k").unwrap());
        assert!(!backend.remove("s", "k").unwrap());
        assert!(backend.get("s", "k").unwrap().is_none());
    }

    #[test]
    fn test_entries_in_key_order() {
        let backend = MemoryBackend::new();
        backend.put("s", "b", b"2").unwrap();
        backend.put("s", "a", b"1").unwrap();
        backend.put("s", "c", b"3").unwrap();

        let keys: Vec<String> = backend
            .entries("s")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn test_remove_store() {
        let backend = MemoryBackend::new();
        backend.create("a").unwrap();
        backend.put("b", "k", b"v").unwrap();
        assert_eq!(backend.store_names().unwrap(), ["a", "b"]);

        assert!(backend.remove_store("a").unwrap());
        assert!(!backend.remove_store("a").unwrap());
        assert_eq!(backend.store_names().unwrap(), ["b"]);
    }

    #[test]
    fn test_size_bytes_sums_values() {
        let backend = MemoryBackend::new();
        backend.put("a", "k1", b"1234").unwrap();
        backend.put("b", "k2", b"56").unwrap();
        assert_eq!(backend.size_bytes().unwrap(), 6);
    }
}
