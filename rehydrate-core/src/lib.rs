/*!
# Rehydrate Core Engine

State persistence and hydration for long-lived application components.

This crate persists a component's in-memory state to durable storage and
restores it later, with support for:

- Hexagonal architecture with pluggable storage and compression adapters
- Integrity verification of every stored record (SHA-256 over canonical JSON)
- Optional gzip compression and AES-256-GCM encryption per record
- Hash-gated, debounced and periodic persistence with bounded retries
- Undo/redo history and named snapshots

## Architecture

Data flows Hydrator → Serializer → Codec → Store on persist and back on load:
- [`Hydrator`] owns one state's lifecycle, timers and history
- [`Serializer`] turns values into self-describing [`TaggedValue`] envelopes
- [`Store`] applies the codec and verifies digests over a [`StorageAdapter`]

## Usage

```rust
use rehydrate_core::{HydrationConfig, Hydrator, MemoryStorage, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Draft {
    title: String,
    words: u32,
}

let store = Arc::new(Store::new(Arc::new(MemoryStorage::new())));

let hydrator = Hydrator::<Draft>::builder("draft").discriminator("doc-1").build()?;
hydrator.initialize(HydrationConfig::default(), store.clone())?;
hydrator.ensure_hydrated()?;
hydrator.commit(|d| d.title = "Chapter one".into())?;
hydrator.persist()?;

let reopened = Hydrator::<Draft>::builder("draft").discriminator("doc-1").build()?;
reopened.initialize(HydrationConfig::default(), store)?;
reopened.ensure_hydrated()?;
assert_eq!(reopened.state().title, "Chapter one");
# Ok::<(), rehydrate_core::HydrateError>(())
```
*/

pub mod codec;
pub mod compression;
pub mod config;
pub mod digest;
pub mod encryption;
pub mod error;
pub mod hydrator;
pub mod observability;
pub mod scheduler;
pub mod serializer;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod value;

#[cfg(test)]
mod error_tests;

pub use codec::Codec;
pub use compression::{CompressionAdapter, GzipCompressor};
pub use config::{HydrationConfig, StorageConfig};
pub use digest::{generate_hash, StateKey};
pub use error::{HydrateError, Result};
pub use hydrator::{
    HydrationEvent, HydrationOutcome, Hydrator, HydratorBuilder, Phase, PersistOutcome,
    PersistedDocument, SubscriptionId,
};
pub use scheduler::Scheduler;
pub use serializer::{CustomSerializer, Envelope, Serializer};
pub use snapshot::{SnapshotDetails, SnapshotRecord};
pub use storage::{
    DocumentDirectory, FixedDirectory, LocalFileStorage, MemoryStorage, StorageAdapter,
};
pub use store::{Record, Store};
pub use value::{TaggedValue, Timestamp};
