/*!
Named snapshots of a hydrator's state.

A snapshot is stored under `"{state key}_snapshot_{name}"` as
`{"creationTime": ..., "stateData": ...}`. Ordinary persist and hydrate never
touch snapshot records.

Snapshots are written uncompressed and unencrypted, whatever the hydrator's
configuration says.
*/

use crate::hydrator::Hydrator;
use crate::{HydrateError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

/// Placeholder replacing a nested mapping in a snapshot summary
pub const MAPPING_PLACEHOLDER: &str = "[mapping]";
/// Placeholder replacing a nested sequence in a snapshot summary
pub const SEQUENCE_PLACEHOLDER: &str = "[sequence]";

/// Stored shape of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub creation_time: DateTime<Utc>,
    pub state_data: Value,
}

/// Listing view of a snapshot that does not expose nested contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDetails {
    pub name: String,
    pub creation_time: DateTime<Utc>,
    pub summary: Value,
}

/// Shallow copy of `document` with every nested container collapsed
pub fn summarize(document: &Value) -> Value {
    fn collapse(value: &Value) -> Value {
        match value {
            Value::Object(_) => Value::String(MAPPING_PLACEHOLDER.to_string()),
            Value::Array(_) => Value::String(SEQUENCE_PLACEHOLDER.to_string()),
            scalar => scalar.clone(),
        }
    }

    match document {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), collapse(value)))
                .collect::<Map<String, Value>>(),
        ),
        other => collapse(other),
    }
}

impl<S> Hydrator<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Save the current state under `name`, replacing any snapshot of that name
    pub fn create_snapshot(&self, name: &str) -> Result<()> {
        let shared = self.shared();
        shared.ready()?;
        validate_name(name)?;

        let (store, state_data) = {
            let core = shared.core();
            (core.store()?, serde_json::to_value(&core.state)?)
        };

        let record = SnapshotRecord {
            creation_time: Utc::now(),
            state_data,
        };
        let key = shared.state_key().snapshot_key(name);
        store.put(&key, &serde_json::to_value(&record)?, false, false)?;

        info!(key = %shared.state_key(), snapshot = name, "Snapshot created");
        Ok(())
    }

    /// Apply a snapshot's state as an ordinary, undoable mutation
    pub fn restore_snapshot(&self, name: &str) -> Result<()> {
        let shared = self.shared();
        shared.ready()?;

        let record = self.load_snapshot(name)?;
        let restored: S = serde_json::from_value(record.state_data)?;
        shared.commit(move |state| *state = restored)?;

        info!(key = %shared.state_key(), snapshot = name, "Snapshot restored");
        Ok(())
    }

    /// Names of this state's snapshots, sorted
    pub fn list_snapshots(&self) -> Result<Vec<String>> {
        let shared = self.shared();
        let store = shared.core().store()?;
        let prefix = shared.state_key().snapshot_prefix();

        Ok(store
            .keys()?
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }

    /// Delete a snapshot; a missing snapshot is a `NotFound` error
    pub fn delete_snapshot(&self, name: &str) -> Result<()> {
        let shared = self.shared();
        let store = shared.core().store()?;
        let key = shared.state_key().snapshot_key(name);

        if !store.contains(&key) {
            return Err(HydrateError::not_found(format!("snapshot '{name}'")));
        }
        store.delete(&key)?;

        info!(key = %shared.state_key(), snapshot = name, "Snapshot deleted");
        Ok(())
    }

    /// Creation time and a redacted summary of a snapshot
    pub fn snapshot_details(&self, name: &str) -> Result<SnapshotDetails> {
        let record = self.load_snapshot(name)?;
        Ok(SnapshotDetails {
            name: name.to_string(),
            creation_time: record.creation_time,
            summary: summarize(&record.state_data),
        })
    }

    fn load_snapshot(&self, name: &str) -> Result<SnapshotRecord> {
        let shared = self.shared();
        let store = shared.core().store()?;
        let key = shared.state_key().snapshot_key(name);

        let raw = store
            .get(&key, false, false)?
            .ok_or_else(|| HydrateError::not_found(format!("snapshot '{name}'")))?;
        Ok(serde_json::from_value(raw)?)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HydrateError::validation("snapshot name cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_collapses_containers() {
        let document = json!({
            "title": "draft",
            "count": 3,
            "archived": false,
            "owner": null,
            "items": [1, 2, 3],
            "settings": {"theme": "dark"}
        });

        assert_eq!(
            summarize(&document),
            json!({
                "title": "draft",
                "count": 3,
                "archived": false,
                "owner": null,
                "items": "[sequence]",
                "settings": "[mapping]"
            })
        );
    }

    #[test]
    fn test_summarize_non_mapping_root() {
        assert_eq!(summarize(&json!([1, 2])), json!("[sequence]"));
        assert_eq!(summarize(&json!(42)), json!(42));
    }

    #[test]
    fn test_record_wire_shape() {
        let record = SnapshotRecord {
            creation_time: DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            state_data: json!({"n": 1}),
        };
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["stateData"], json!({"n": 1}));
        assert!(wire["creationTime"].as_str().unwrap().starts_with("2025-01-02T03:04:05"));
    }
}
