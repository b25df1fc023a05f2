//! Disk-backed store backend.
//!
//! Layout: one directory per store under the root, one file per entry. Entry
//! files are named by the sha-256 of the key, so arbitrary request URLs never
//! meet filesystem name rules. Each file starts with a single JSON header
//! line carrying the original key (header strings escape newlines, so the
//! first raw newline always terminates the header), followed by the value
//! bytes untouched.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

use super::StoreBackend;

/// Entry file extension.
const ENTRY_EXT: &str = "entry";

/// Extension of in-flight write files awaiting their rename.
const TMP_EXT: &str = "tmp";

#[derive(Serialize, Deserialize)]
struct RecordHeader {
    key: String,
}

/// Backend persisting stores under a root directory.
///
/// Writes go to a temp file first and land via rename, so concurrent writers
/// to the same key settle on one complete record (last write wins).
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let backend = Self { root };
        backend.sweep_temp_files();
        Ok(backend)
    }

    fn store_dir(&self, store: &str) -> PathBuf {
        self.root.join(store)
    }

    fn entry_path(&self, store: &str, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.store_dir(store).join(format!("{}.{}", digest, ENTRY_EXT))
    }

    /// Remove temp files stranded by a crash between write and rename.
    /// Best-effort; a leftover only wastes bytes until the next sweep.
    fn sweep_temp_files(&self) {
        let stores = match self.store_names() {
            Ok(stores) => stores,
            Err(e) => {
                warn!(error = %e, "Could not list stores for temp-file sweep");
                return;
            }
        };
        for store in stores {
            let dir = self.store_dir(&store);
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) => {
                    warn!(store, error = %e, "Could not scan store for temp files");
                    continue;
                }
            };
            for dir_entry in read_dir.flatten() {
                let path = dir_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(TMP_EXT) {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!(?path, "Removed stranded temp file"),
                    Err(e) => warn!(?path, error = %e, "Could not remove stranded temp file"),
                }
            }
        }
    }
}

fn encode_record(key: &str, value: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec(&RecordHeader {
        key: key.to_string(),
    })?;
    bytes.push(b'\n');
    bytes.extend_from_slice(value);
    Ok(bytes)
}

fn decode_record(bytes: &[u8]) -> Result<(String, Vec<u8>), StoreError> {
    let split = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "missing record header"))?;
    let header: RecordHeader = serde_json::from_slice(&bytes[..split])?;
    Ok((header.key, bytes[split + 1..].to_vec()))
}

impl StoreBackend for DiskBackend {
    fn create(&self, store: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(self.store_dir(store))?;
        Ok(())
    }

    fn put(&self, store: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.create(store)?;
        let path = self.entry_path(store, key);
        let tmp = path.with_extension(format!("{}.{}", Uuid::new_v4(), TMP_EXT));
        std::fs::write(&tmp, encode_record(key, value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self, store: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.entry_path(store, key)) {
            Ok(bytes) => decode_record(&bytes).map(|(_, value)| Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, store: &str, key: &str) -> Result<bool, StoreError> {
        match std::fs::remove_file(self.entry_path(store, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self, store: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let dir = self.store_dir(store);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match std::fs::read(&path).map_err(StoreError::from).and_then(|b| decode_record(&b)) {
                Ok(record) => entries.push(record),
                Err(e) => warn!(store, ?path, error = %e, "Skipping unreadable entry file"),
            }
        }
        // File names are hashes; order by the recovered keys.
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    fn remove_store(&self, store: &str) -> Result<bool, StoreError> {
        match std::fs::remove_dir_all(self.store_dir(store)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for dir_entry in std::fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if dir_entry.file_type()?.is_dir() {
                if let Some(name) = dir_entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn size_bytes(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        for store in self.store_names()? {
            total += dir_size(&self.store_dir(&store))?;
        }
        Ok(total)
    }
}

fn dir_size(dir: &Path) -> Result<u64, StoreError> {
    let mut total = 0;
    for dir_entry in std::fs::read_dir(dir)? {
        let metadata = dir_entry?.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_binary_value() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();

        // Bytes with an embedded newline and invalid UTF-8.
        let value = vec![0x7b, 0x0a, 0x00, 0x9f, 0x92, 0x96];
        backend.put("dynamic-v1", "GET https://x/a", &value).unwrap();
        assert_eq!(
            backend.get("dynamic-v1", "GET https://x/a").unwrap(),
            Some(value)
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = DiskBackend::new(dir.path()).unwrap();
            backend.put("precache-v1", "GET https://x/app.css", b"body{}").unwrap();
        }

        let reopened = DiskBackend::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("precache-v1", "GET https://x/app.css").unwrap(),
            Some(b"body{}".to_vec())
        );
        assert_eq!(reopened.store_names().unwrap(), ["precache-v1"]);
    }

    #[test]
    fn test_entries_ordered_by_key_not_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        backend.put("s", "00000000000000000003-c", b"3").unwrap();
        backend.put("s", "00000000000000000001-a", b"1").unwrap();
        backend.put("s", "00000000000000000002-b", b"2").unwrap();

        let keys: Vec<String> = backend
            .entries("s")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            [
                "00000000000000000001-a",
                "00000000000000000002-b",
                "00000000000000000003-c"
            ]
        );
    }

    #[test]
    fn test_corrupt_entry_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        backend.put("s", "good", b"ok").unwrap();
        std::fs::write(dir.path().join("s").join("feedface.entry"), b"no header").unwrap();

        let entries = backend.entries("s").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "good");
    }

    #[test]
    fn test_remove_store_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        backend.create("precache-v1").unwrap();
        backend.create("dynamic-v1").unwrap();
        assert_eq!(backend.store_names().unwrap(), ["dynamic-v1", "precache-v1"]);

        assert!(backend.remove_store("precache-v1").unwrap());
        assert!(!backend.remove_store("precache-v1").unwrap());
        assert_eq!(backend.store_names().unwrap(), ["dynamic-v1"]);
    }

    #[test]
    fn test_overwrite_keeps_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        backend.put("s", "k", b"first").unwrap();
        backend.put("s", "k", b"second").unwrap();

        assert_eq!(backend.get("s", "k").unwrap(), Some(b"second".to_vec()));
        assert_eq!(backend.entries("s").unwrap().len(), 1);
    }

    #[test]
    fn test_size_bytes_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path()).unwrap();
        assert_eq!(backend.size_bytes().unwrap(), 0);
        backend.put("s", "k", b"0123456789").unwrap();
        assert!(backend.size_bytes().unwrap() >= 10);
    }

    #[test]
    fn test_reopen_sweeps_stranded_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let size_before = {
            let backend = DiskBackend::new(dir.path()).unwrap();
            backend.put("s", "k", b"value").unwrap();
            backend.size_bytes().unwrap()
        };
        // A crash between write and rename leaves one of these behind.
        let stranded = dir.path().join("s").join("feedface.0.tmp");
        std::fs::write(&stranded, b"partial").unwrap();

        let reopened = DiskBackend::new(dir.path()).unwrap();

        assert!(!stranded.exists());
        assert_eq!(reopened.size_bytes().unwrap(), size_before);
        assert_eq!(reopened.get("s", "k").unwrap(), Some(b"value".to_vec()));
    }
}
