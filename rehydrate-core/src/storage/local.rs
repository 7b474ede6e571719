/*!
Local filesystem storage adapter implementation.
*/

use super::{validate_key, DocumentDirectory, StorageAdapter};
use crate::{HydrateError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const RECORD_EXTENSION: &str = "json";

/// Local filesystem storage adapter
///
/// Each record lives in `<base_dir>/<key>.json`. Writes go to a temporary file
/// in the same directory which is then renamed over the target, so a crash
/// mid-write leaves the previous record intact.
///
/// # Example
/// ```rust
/// use rehydrate_core::storage::{LocalFileStorage, StorageAdapter};
///
/// let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::with_base_dir(dir.path());
/// storage.save("settings", br#"{"theme":"dark"}"#)?;
/// assert!(storage.exists("settings"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
}

impl LocalFileStorage {
    /// Create a storage adapter rooted at `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    /// Create a storage adapter rooted at the host's document directory
    pub fn from_provider(provider: &dyn DocumentDirectory) -> Result<Self> {
        Ok(Self::with_base_dir(provider.document_dir()?))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the file path for a record key
    fn record_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }

    /// Ensure the base directory exists, creating it if necessary
    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                HydrateError::store_write(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl StorageAdapter for LocalFileStorage {
    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.record_path(key)?;
        self.ensure_base_dir()?;

        let write_err = |e: std::io::Error| {
            HydrateError::store_write(format!(
                "Failed to write record to {}: {}",
                full_path.display(),
                e
            ))
        };

        let mut temp = NamedTempFile::new_in(&self.base_dir).map_err(write_err)?;
        temp.write_all(data).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&full_path).map_err(|e| write_err(e.error))?;

        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_path = self.record_path(key)?;

        match fs::read(&full_path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HydrateError::store_read(format!(
                "Failed to read record from {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn exists(&self, key: &str) -> bool {
        self.record_path(key)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.record_path(key)?;

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HydrateError::store_write(format!(
                "Failed to delete record {}: {}",
                full_path.display(),
                e
            ))),
        }
    }

    fn keys(&self) -> Result<BTreeSet<String>> {
        if !self.base_dir.exists() {
            return Ok(BTreeSet::new());
        }

        let entries = fs::read_dir(&self.base_dir).map_err(|e| {
            HydrateError::store_read(format!(
                "Failed to list {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let mut keys = BTreeSet::new();
        for entry in entries {
            let path = entry
                .map_err(|e| HydrateError::store_read(format!("Failed to read entry: {e}")))?
                .path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.insert(stem.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn clear(&self) -> Result<()> {
        for key in self.keys()? {
            self.delete(&key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FixedDirectory;
    use tempfile::TempDir;

    #[test]
    fn test_local_file_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        let test_data = b"test record data";

        assert!(storage.save("record_1", test_data).is_ok());
        assert!(storage.exists("record_1"));
        assert!(temp_dir.path().join("record_1.json").is_file());

        let loaded_data = storage.load("record_1").unwrap();
        assert_eq!(loaded_data.as_deref(), Some(&test_data[..]));

        assert!(storage.delete("record_1").is_ok());
        assert!(!storage.exists("record_1"));
    }

    #[test]
    fn test_overwrite_replaces_whole_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        storage.save("k", b"a much longer first version").unwrap();
        storage.save("k", b"short").unwrap();

        assert_eq!(storage.load("k").unwrap(), Some(b"short".to_vec()));
    }

    #[test]
    fn test_creates_missing_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path().join("app/state"));

        storage.save("k", b"v").unwrap();
        assert_eq!(storage.load("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_load_nonexistent_record() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        assert_eq!(storage.load("nonexistent").unwrap(), None);
        assert!(storage.delete("nonexistent").is_ok());
    }

    #[test]
    fn test_keys_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        storage.save("b", b"2").unwrap();
        storage.save("a", b"1").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        let keys: Vec<String> = storage.keys().unwrap().into_iter().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        storage.clear().unwrap();
        assert!(storage.keys().unwrap().is_empty());
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        let result = storage.save("../escape", b"x");
        assert!(matches!(result, Err(HydrateError::Validation(_))));
        assert!(!storage.exists("../escape"));
    }

    #[test]
    fn test_from_provider() {
        let temp_dir = TempDir::new().unwrap();
        let provider = FixedDirectory(temp_dir.path().to_path_buf());

        let storage = LocalFileStorage::from_provider(&provider).unwrap();
        assert_eq!(storage.base_dir(), temp_dir.path());
    }
}
