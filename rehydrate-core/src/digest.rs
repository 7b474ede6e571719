/*!
Content digests and state identity keys.

Digests are SHA-256 over the canonical JSON encoding of a document: object
keys sorted recursively, compact separators. Two structurally equal documents
always produce the same digest regardless of map insertion order.
*/

use crate::{HydrateError, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Compute the SHA-256 hash of the provided bytes as lowercase hex
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Encode a JSON document canonically
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Digest of a JSON document
pub fn document_hash(document: &Value) -> String {
    compute_hash(canonical_json(document).as_bytes())
}

/// Digest of any serializable value, via its JSON document form
pub fn generate_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let document = serde_json::to_value(value)?;
    Ok(document_hash(&document))
}

/// Verify that `data` hashes to `expected`
pub fn verify_integrity(expected: &str, data: &[u8]) -> Result<()> {
    let actual = compute_hash(data);
    if actual == expected {
        Ok(())
    } else {
        Err(HydrateError::IntegrityCheckFailed {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Stable identity of one logical persisted state
///
/// Derived by hashing `"{type}-{discriminator}"`; an absent discriminator
/// hashes as the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(String);

impl StateKey {
    pub fn derive(type_name: &str, discriminator: Option<&str>) -> Self {
        let seed = format!("{}-{}", type_name, discriminator.unwrap_or(""));
        Self(compute_hash(seed.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key of a named snapshot belonging to this state
    pub fn snapshot_key(&self, name: &str) -> String {
        format!("{}{}", self.snapshot_prefix(), name)
    }

    /// Prefix shared by every snapshot key of this state
    pub fn snapshot_prefix(&self) -> String {
        format!("{}_snapshot_", self.0)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
