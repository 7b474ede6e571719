#![allow(dead_code)]

use rehydrate_core::{
    HydrateError, HydrationConfig, Hydrator, MemoryStorage, Result, StorageAdapter, Store,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Editor {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub revision: u32,
}

impl Editor {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }
}

/// Memory backend whose next `failures` saves fail with the given error
pub struct FlakyStorage {
    inner: MemoryStorage,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    error: fn() -> HydrateError,
}

impl FlakyStorage {
    pub fn failing(failures: usize) -> Self {
        Self::failing_with(failures, || HydrateError::store_write("disk unavailable"))
    }

    pub fn failing_with(failures: usize, error: fn() -> HydrateError) -> Self {
        Self {
            inner: MemoryStorage::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            error,
        }
    }

    pub fn save_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> usize {
        self.inner.save_count()
    }
}

impl StorageAdapter for FlakyStorage {
    fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err((self.error)());
        }
        self.inner.save(key, data)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.load(key)
    }

    fn exists(&self, key: &str) -> bool {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn keys(&self) -> Result<BTreeSet<String>> {
        self.inner.keys()
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}

/// Config with timers off and fast retries
pub fn quiet_config() -> HydrationConfig {
    HydrationConfig {
        auto_save_interval: None,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

pub fn memory_store() -> (Arc<MemoryStorage>, Arc<Store>) {
    let backend = Arc::new(MemoryStorage::new());
    let store = Arc::new(Store::new(backend.clone()));
    (backend, store)
}

/// An initialized, not yet hydrated editor hydrator
pub fn editor(store: &Arc<Store>, config: HydrationConfig) -> Hydrator<Editor> {
    let hydrator = Hydrator::<Editor>::builder("editor")
        .discriminator("main")
        .build()
        .unwrap();
    hydrator.initialize(config, store.clone()).unwrap();
    hydrator
}
