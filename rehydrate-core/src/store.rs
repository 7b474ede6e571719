/*!
Record store with integrity verification.

Every document is written as a self-describing [`Record`]: the (optionally
transformed) payload, the digest of the canonical text, and the flags saying
which transforms were applied. Reads reverse the transforms and refuse to
return anything whose digest does not match.
*/

use crate::codec::Codec;
use crate::digest::{canonical_json, compute_hash, verify_integrity};
use crate::storage::{validate_key, StorageAdapter};
use crate::{HydrateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Current record format version
pub const RECORD_FORMAT_VERSION: u32 = 1;

/// On-disk shape of one stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Canonical JSON text, or base64 of the transformed bytes
    pub data: String,
    /// Lowercase hex SHA-256 of the canonical text before any transform
    pub hash: String,
    pub version: u32,
    pub compressed: bool,
    pub encrypted: bool,
}

impl Record {
    pub fn is_transformed(&self) -> bool {
        self.compressed || self.encrypted
    }
}

/// Durable key to [`Record`] mapping over a pluggable backend
pub struct Store {
    backend: Arc<dyn StorageAdapter>,
    codec: Codec,
}

impl Store {
    /// Create a store over `backend` with the default codec
    pub fn new(backend: Arc<dyn StorageAdapter>) -> Self {
        Self::with_codec(backend, Codec::new())
    }

    pub fn with_codec(backend: Arc<dyn StorageAdapter>, codec: Codec) -> Self {
        Self { backend, codec }
    }

    pub fn backend(&self) -> &Arc<dyn StorageAdapter> {
        &self.backend
    }

    /// Install or remove the key used for encrypted records
    pub fn set_encryption_key(&self, passphrase: Option<&str>) -> Result<()> {
        self.codec.set_encryption_key(passphrase)
    }

    pub fn has_encryption_key(&self) -> bool {
        self.codec.has_encryption_key()
    }

    /// Write `document` under `key`, replacing any previous record
    ///
    /// # Arguments
    /// * `key` - Record key, restricted to `[A-Za-z0-9_.-]`
    /// * `document` - JSON document to store
    /// * `compress` - Gzip the canonical text before storing
    /// * `encrypt` - Encrypt the (possibly compressed) bytes
    ///
    /// # Returns
    /// The stored record's digest
    pub fn put(&self, key: &str, document: &Value, compress: bool, encrypt: bool) -> Result<String> {
        validate_key(key)?;

        let text = canonical_json(document);
        let hash = compute_hash(text.as_bytes());
        let data = self.codec.encode(&text, compress, encrypt)?;

        let record = Record {
            data,
            hash: hash.clone(),
            version: RECORD_FORMAT_VERSION,
            compressed: compress,
            encrypted: encrypt,
        };
        let bytes = serde_json::to_vec(&record)?;

        debug!(
            key,
            compress,
            encrypt,
            text_bytes = text.len(),
            record_bytes = bytes.len(),
            "Writing record"
        );

        self.backend.save(key, &bytes).map_err(|e| match e {
            HydrateError::StoreWrite(_) | HydrateError::Validation(_) => e,
            other => HydrateError::store_write(other.to_string()),
        })?;

        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|m| m.record_state_size(bytes.len()));

        Ok(hash)
    }

    /// Load the raw record under `key` without decoding it
    pub fn get_record(&self, key: &str) -> Result<Option<Record>> {
        validate_key(key)?;

        let bytes = match self.backend.load(key).map_err(|e| match e {
            HydrateError::StoreRead(_) | HydrateError::Validation(_) => e,
            other => HydrateError::store_read(other.to_string()),
        })? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let record: Record = serde_json::from_slice(&bytes).map_err(|e| {
            HydrateError::invalid_format(format!("Record '{key}' is not a valid record: {e}"))
        })?;
        Ok(Some(record))
    }

    /// Load and verify the document under `key`
    ///
    /// A transform is reversed only when the record carries its flag and the
    /// caller asked for it. A record left undecoded is a codec error, never
    /// returned as is.
    pub fn get(&self, key: &str, decompress: bool, decrypt: bool) -> Result<Option<Value>> {
        let record = match self.get_record(key)? {
            Some(record) => record,
            None => return Ok(None),
        };

        if record.compressed && !decompress {
            return Err(HydrateError::codec(format!(
                "Record '{key}' is compressed but decompression was not requested"
            )));
        }
        if record.encrypted && !decrypt {
            return Err(HydrateError::codec(format!(
                "Record '{key}' is encrypted but decryption was not requested"
            )));
        }

        let text = self
            .codec
            .decode(&record.data, record.compressed, record.encrypted)?;

        if let Err(e) = verify_integrity(&record.hash, text.as_bytes()) {
            warn!(key, error = %e, "Integrity check failed");
            #[cfg(feature = "metrics")]
            crate::observability::with_metrics(|m| m.integrity_failures_total.inc());
            return Err(e);
        }

        debug!(key, bytes = text.len(), "Record verified");
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Check if a record exists under `key`
    pub fn contains(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.backend.exists(key)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        debug!(key, "Deleting record");
        self.backend.delete(key)
    }

    pub fn clear(&self) -> Result<()> {
        debug!("Clearing all records");
        self.backend.clear()
    }

    pub fn keys(&self) -> Result<BTreeSet<String>> {
        self.backend.keys()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("compression", &self.codec.compression_algorithm())
            .field("has_encryption_key", &self.codec.has_encryption_key())
            .finish()
    }
}
