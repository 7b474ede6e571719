/*!
Storage backends for persisted records.

This module defines the backend abstraction (port) and concrete
implementations (adapters). The record store above it never depends on where
or how the bytes are kept.
*/

pub mod local;

use crate::{HydrateError, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

pub use local::LocalFileStorage;

/// Key-value backend holding one serialized record per key
///
/// Implementations must make `save` atomic per key: a reader sees either the
/// previous record or the new one, never a partial write.
pub trait StorageAdapter: Send + Sync {
    /// Replace the bytes stored under `key`
    fn save(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Load the bytes stored under `key`, or `None` if absent
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check if a record exists under `key`
    fn exists(&self, key: &str) -> bool;

    /// Delete the record under `key`; deleting an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// All keys currently stored
    fn keys(&self) -> Result<BTreeSet<String>>;

    /// Delete every record
    fn clear(&self) -> Result<()>;
}

/// Reject keys that are empty or could escape a flat namespace
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(HydrateError::validation("storage key cannot be empty"));
    }
    if let Some(c) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(HydrateError::validation(format!(
            "storage key '{key}' contains invalid character '{c}'"
        )));
    }
    if key.starts_with('.') {
        return Err(HydrateError::validation(format!(
            "storage key '{key}' cannot start with '.'"
        )));
    }
    Ok(())
}

/// Host collaborator that knows where application documents live
pub trait DocumentDirectory: Send + Sync {
    fn document_dir(&self) -> Result<PathBuf>;
}

/// A document directory fixed at construction
#[derive(Debug, Clone)]
pub struct FixedDirectory(pub PathBuf);

impl DocumentDirectory for FixedDirectory {
    fn document_dir(&self) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Memory-based storage adapter
///
/// Keeps records in a `HashMap`. Useful for tests and for embedding without
/// touching the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls since construction
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Raw bytes under `key`, bypassing the record layer
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.entries().get(key).cloned()
    }

    /// Overwrite raw bytes under `key` without counting a save
    pub fn put_raw(&self, key: &str, data: Vec<u8>) {
        self.entries().insert(key.to_string(), data);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageAdapter for MemoryStorage {
    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.entries().insert(key.to_string(), data.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    fn exists(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.entries().keys().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();

        storage.save("alpha", b"one").unwrap();
        storage.save("beta", b"two").unwrap();

        assert!(storage.exists("alpha"));
        assert_eq!(storage.load("alpha").unwrap(), Some(b"one".to_vec()));
        assert_eq!(storage.load("missing").unwrap(), None);
        assert_eq!(
            storage.keys().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert_eq!(storage.save_count(), 2);

        storage.delete("alpha").unwrap();
        assert!(!storage.exists("alpha"));
        storage.delete("alpha").unwrap();

        storage.clear().unwrap();
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("3f2a_snapshot_draft-1.v2").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("with space").is_err());
        assert!(validate_key(".hidden").is_err());
    }

    #[test]
    fn test_fixed_directory() {
        let provider = FixedDirectory(PathBuf::from("/var/lib/app"));
        assert_eq!(provider.document_dir().unwrap(), PathBuf::from("/var/lib/app"));
    }
}
