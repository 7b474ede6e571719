/*!
Hydration orchestrator.

A [`Hydrator`] owns the lifecycle of one logical state: it derives the state's
identity key, restores (or defaults) the state from the [`Store`], persists it
back only when its content hash changes, and keeps undo/redo history.

Lifecycle: `Uninitialized → Initialized → Hydrated`.

```rust,no_run
use rehydrate_core::{HydrationConfig, Hydrator, LocalFileStorage, Store};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    value: i64,
}

# fn main() -> rehydrate_core::Result<()> {
let store = Arc::new(Store::new(Arc::new(LocalFileStorage::with_base_dir("./state"))));
let hydrator = Hydrator::<Counter>::builder("counter").build()?;

hydrator.initialize(HydrationConfig::default(), store)?;
hydrator.ensure_hydrated()?;
hydrator.commit(|c| c.value += 1)?;
hydrator.teardown()?;
# Ok(())
# }
```
*/

use crate::config::HydrationConfig;
use crate::digest::{document_hash, StateKey};
use crate::scheduler::Scheduler;
use crate::serializer::{Envelope, Serializer};
use crate::store::Store;
use crate::{HydrateError, Result};
use chrono::{DateTime, Utc};
use rehydrate_retry::Retry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a hydrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    Hydrated,
}

/// How a hydration cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// The stored document was restored
    Restored,
    /// Nothing was stored; the default state was applied
    Defaulted,
    /// The stored document was older than the configured expiration
    Expired,
    /// The stored document was unreadable; it was deleted and the default applied
    Recovered,
    /// The hydrator was already hydrated; nothing happened
    AlreadyHydrated,
}

/// Result of a persist call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Written { hash: String },
    /// The state hash matched the last persisted hash
    Skipped,
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum HydrationEvent {
    Hydrated(HydrationOutcome),
    StateChanged,
    Persisted { hash: String },
    PersistFailed { error: String },
}

/// Handle returned by [`Hydrator::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Primary record document: the serialized state plus when it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub version: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub state: Envelope,
}

type DefaultFn<S> = Box<dyn Fn() -> S + Send + Sync>;
type MigrationFn = Box<dyn Fn(Value, u32, u32) -> Result<Value> + Send + Sync>;
type Observer = Arc<dyn Fn(&HydrationEvent) + Send + Sync>;

/// Configures and builds a [`Hydrator`]
pub struct HydratorBuilder<S> {
    type_name: String,
    discriminator: Option<String>,
    default_state: DefaultFn<S>,
    migration: Option<MigrationFn>,
    serializer: Serializer,
}

impl<S> HydratorBuilder<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Distinguishes several states of the same type
    pub fn discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Initializer used when nothing usable is stored
    pub fn default_state<F>(mut self, init: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.default_state = Box::new(init);
        self
    }

    /// Hook run on every restored document before it is applied
    ///
    /// Receives the stored document, the version it was written with and the
    /// configured current version.
    pub fn migration<F>(mut self, migrate: F) -> Self
    where
        F: Fn(Value, u32, u32) -> Result<Value> + Send + Sync + 'static,
    {
        self.migration = Some(Box::new(migrate));
        self
    }

    pub fn serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn build(self) -> Result<Hydrator<S>> {
        if self.type_name.is_empty() {
            return Err(HydrateError::validation("state type name cannot be empty"));
        }

        let state_key = StateKey::derive(&self.type_name, self.discriminator.as_deref());
        let state = (self.default_state)();
        debug!(type_name = %self.type_name, key = %state_key, "Hydrator built");

        Ok(Hydrator {
            shared: Arc::new_cyclic(|this| Shared {
                this: this.clone(),
                type_name: self.type_name,
                state_key,
                default_state: self.default_state,
                migration: self.migration,
                serializer: self.serializer,
                core: Mutex::new(Core {
                    phase: Phase::Uninitialized,
                    state,
                    config: HydrationConfig::default(),
                    store: None,
                    last_persisted_hash: None,
                    cached_document: None,
                    undo: Vec::new(),
                    redo: Vec::new(),
                }),
                persist_lock: Mutex::new(()),
                observers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                scheduler: Scheduler::new(),
                cancelled: AtomicBool::new(false),
                timers_halted: AtomicBool::new(false),
            }),
        })
    }
}

/// Orchestrates hydration and persistence of one state value
pub struct Hydrator<S> {
    shared: Arc<Shared<S>>,
}

pub(crate) struct Shared<S> {
    /// Handed to timer jobs so they never keep the state alive
    this: Weak<Shared<S>>,
    type_name: String,
    state_key: StateKey,
    default_state: DefaultFn<S>,
    migration: Option<MigrationFn>,
    serializer: Serializer,
    core: Mutex<Core<S>>,
    /// Serializes persist cycles
    persist_lock: Mutex<()>,
    observers: Mutex<Vec<(SubscriptionId, Observer)>>,
    next_subscription: AtomicU64,
    scheduler: Scheduler,
    /// Set when the owning handle is dropped; stops in-flight retries
    cancelled: AtomicBool,
    /// Set on teardown or drop; stops timer persists and their retries
    timers_halted: AtomicBool,
}

pub(crate) struct Core<S> {
    pub(crate) phase: Phase,
    pub(crate) state: S,
    pub(crate) config: HydrationConfig,
    pub(crate) store: Option<Arc<Store>>,
    pub(crate) last_persisted_hash: Option<String>,
    pub(crate) cached_document: Option<Value>,
    pub(crate) undo: Vec<Value>,
    pub(crate) redo: Vec<Value>,
}

impl<S> Core<S> {
    pub(crate) fn store(&self) -> Result<Arc<Store>> {
        match (&self.phase, &self.store) {
            (Phase::Uninitialized, _) | (_, None) => Err(HydrateError::NotInitialized),
            (_, Some(store)) => Ok(store.clone()),
        }
    }
}

enum Loaded<S> {
    Absent,
    Expired,
    Restored { state: S, document: Value },
}

/// Oldest write time that is still fresh; `None` when `max_age` reaches past
/// the representable range, which means records never expire
fn expiry_cutoff(max_age: Duration) -> Option<DateTime<Utc>> {
    let max_age = chrono::Duration::from_std(max_age).ok()?;
    Utc::now().checked_sub_signed(max_age)
}

impl<S> Hydrator<S>
where
    S: Default + Serialize + DeserializeOwned + Send + 'static,
{
    /// Start building a hydrator whose default state is `S::default()`
    pub fn builder(type_name: impl Into<String>) -> HydratorBuilder<S> {
        Self::builder_with(type_name, S::default)
    }
}

impl<S> Hydrator<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Start building a hydrator with an explicit default-state initializer
    pub fn builder_with<F>(type_name: impl Into<String>, default_state: F) -> HydratorBuilder<S>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        HydratorBuilder {
            type_name: type_name.into(),
            discriminator: None,
            default_state: Box::new(default_state),
            migration: None,
            serializer: Serializer::new(),
        }
    }

    /// Bind configuration and store, and start the auto-save timer
    ///
    /// Timers need a Tokio runtime in the calling context; without one they
    /// stay disabled and only explicit persists write.
    pub fn initialize(&self, config: HydrationConfig, store: Arc<Store>) -> Result<()> {
        config.validate()?;

        {
            let mut core = self.shared.core();
            if core.phase != Phase::Uninitialized {
                return Err(HydrateError::validation(format!(
                    "hydrator for '{}' is already initialized",
                    self.shared.type_name
                )));
            }
            if let Some(key) = config.encryption_key.as_deref().filter(|k| !k.is_empty()) {
                store.set_encryption_key(Some(key))?;
            }
            core.config = config;
            core.store = Some(store);
            core.phase = Phase::Initialized;
        }

        self.shared.scheduler.attach_current();
        self.shared.schedule_auto_save();
        info!(
            type_name = %self.shared.type_name,
            key = %self.shared.state_key,
            "Hydrator initialized"
        );
        Ok(())
    }

    /// Load the stored state, or fall back to the default
    ///
    /// Never fails once initialized: any problem with the stored record is
    /// logged, the record is deleted and the default state applied.
    pub fn ensure_hydrated(&self) -> Result<HydrationOutcome> {
        self.shared.ensure_hydrated()
    }

    /// Persist the current state unless it matches the last persisted hash
    pub fn persist(&self) -> Result<PersistOutcome> {
        self.shared.ready()?;
        self.shared.persist(false)
    }

    /// Persist the current state unconditionally
    pub fn force_persist(&self) -> Result<PersistOutcome> {
        self.shared.ready()?;
        self.shared.persist(true)
    }

    /// Apply a mutation to the live state
    ///
    /// If the state document changed, the previous document is pushed onto
    /// the undo stack, the redo stack is cleared, subscribers are notified and
    /// the debounce timer is re-armed.
    pub fn commit<R>(&self, mutate: impl FnOnce(&mut S) -> R) -> Result<R> {
        self.shared.commit(mutate)
    }

    /// Step back to the previous state; `false` if there is none
    pub fn undo(&self) -> Result<bool> {
        self.shared.ready()?;
        self.shared.step_history(true)
    }

    /// Re-apply the most recently undone state; `false` if there is none
    pub fn redo(&self) -> Result<bool> {
        self.shared.ready()?;
        self.shared.step_history(false)
    }

    pub fn can_undo(&self) -> bool {
        !self.shared.core().undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.shared.core().redo.is_empty()
    }

    pub fn clear_history(&self) {
        let mut core = self.shared.core();
        core.undo.clear();
        core.redo.clear();
    }

    /// Replace or cancel the auto-save timer
    pub fn set_auto_save_interval(&self, interval: Option<Duration>) -> Result<()> {
        if interval == Some(Duration::ZERO) {
            return Err(HydrateError::validation(
                "auto-save interval must be non-zero; use None to disable it",
            ));
        }
        {
            let mut core = self.shared.core();
            core.store()?;
            core.config.auto_save_interval = interval;
        }
        self.shared.schedule_auto_save();
        Ok(())
    }

    /// Change the configuration at runtime
    ///
    /// The updated configuration is validated before it replaces the current
    /// one; the encryption key and auto-save timer follow the new values.
    pub fn update_config(&self, update: impl FnOnce(&mut HydrationConfig)) -> Result<()> {
        {
            let mut core = self.shared.core();
            let store = core.store()?;
            let mut config = core.config.clone();
            update(&mut config);
            config.validate()?;

            store.set_encryption_key(config.encryption_key.as_deref().filter(|k| !k.is_empty()))?;
            core.config = config;
        }
        self.shared.schedule_auto_save();
        Ok(())
    }

    /// Cancel timers and persist pending changes
    ///
    /// A timer persist that is backing off stops before its next retry.
    /// Timers stay halted afterwards; explicit persists still work.
    pub fn teardown(&self) -> Result<PersistOutcome> {
        self.shared.timers_halted.store(true, Ordering::SeqCst);
        self.shared.scheduler.cancel_all();
        let phase = self.shared.core().phase;
        info!(key = %self.shared.state_key, "Hydrator teardown");
        match phase {
            Phase::Uninitialized => Err(HydrateError::NotInitialized),
            Phase::Initialized => Ok(PersistOutcome::Skipped),
            Phase::Hydrated => self.shared.persist(false),
        }
    }

    /// Delete the primary record and reset to the default state
    pub fn clear_persisted(&self) -> Result<()> {
        let store = self.shared.core().store()?;
        self.shared.scheduler.cancel_debounce();
        store.delete(self.shared.state_key.as_str())?;

        {
            let mut core = self.shared.core();
            core.state = (self.shared.default_state)();
            core.last_persisted_hash = None;
            core.cached_document = None;
            core.undo.clear();
            core.redo.clear();
        }
        info!(key = %self.shared.state_key, "Persisted state cleared");
        self.shared.notify(&HydrationEvent::StateChanged);
        Ok(())
    }

    /// Register an observer; it is called outside internal locks
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&HydrationEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.shared.observers().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.shared.observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// A copy of the live state
    pub fn state(&self) -> S
    where
        S: Clone,
    {
        self.shared.core().state.clone()
    }

    /// Read the live state without cloning it
    pub fn with_state<R>(&self, read: impl FnOnce(&S) -> R) -> R {
        read(&self.shared.core().state)
    }

    pub fn phase(&self) -> Phase {
        self.shared.core().phase
    }

    pub fn state_key(&self) -> &StateKey {
        &self.shared.state_key
    }

    pub fn type_name(&self) -> &str {
        &self.shared.type_name
    }

    pub fn config(&self) -> HydrationConfig {
        self.shared.core().config.clone()
    }

    /// The state document as of the last successful hydrate or persist
    pub fn cached_document(&self) -> Option<Value> {
        self.shared.core().cached_document.clone()
    }

    pub fn last_persisted_hash(&self) -> Option<String> {
        self.shared.core().last_persisted_hash.clone()
    }

    pub(crate) fn shared(&self) -> &Shared<S> {
        &self.shared
    }
}

impl<S> Drop for Hydrator<S> {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.timers_halted.store(true, Ordering::SeqCst);
        self.shared.scheduler.cancel_all();
    }
}

impl<S> fmt::Debug for Hydrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core();
        f.debug_struct("Hydrator")
            .field("type_name", &self.shared.type_name)
            .field("state_key", &self.shared.state_key)
            .field("phase", &core.phase)
            .field("undo_depth", &core.undo.len())
            .field("redo_depth", &core.redo.len())
            .finish()
    }
}

impl<S> Shared<S> {
    pub(crate) fn core(&self) -> MutexGuard<'_, Core<S>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Observer)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Shared<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn state_key(&self) -> &StateKey {
        &self.state_key
    }

    pub(crate) fn notify(&self, event: &HydrationEvent) {
        let observers: Vec<Observer> = self
            .observers()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    /// Fail before initialization; hydrate first if not yet hydrated
    pub(crate) fn ready(&self) -> Result<()> {
        let phase = self.core().phase;
        match phase {
            Phase::Uninitialized => Err(HydrateError::NotInitialized),
            Phase::Initialized => self.ensure_hydrated().map(|_| ()),
            Phase::Hydrated => Ok(()),
        }
    }

    fn ensure_hydrated(&self) -> Result<HydrationOutcome> {
        let outcome = {
            let mut core = self.core();
            match core.phase {
                Phase::Uninitialized => return Err(HydrateError::NotInitialized),
                Phase::Hydrated => return Ok(HydrationOutcome::AlreadyHydrated),
                Phase::Initialized => {}
            }
            let store = core.store()?;

            let (state, document, outcome) = match self.load(&store, &core.config) {
                Ok(Loaded::Restored { state, document }) => {
                    (state, Some(document), HydrationOutcome::Restored)
                }
                Ok(Loaded::Absent) => ((self.default_state)(), None, HydrationOutcome::Defaulted),
                Ok(Loaded::Expired) => ((self.default_state)(), None, HydrationOutcome::Expired),
                Err(e) => {
                    warn!(
                        key = %self.state_key,
                        error = %e,
                        "Stored state is unusable; deleting it and using the default"
                    );
                    if let Err(delete_err) = store.delete(self.state_key.as_str()) {
                        warn!(key = %self.state_key, error = %delete_err, "Failed to delete unusable record");
                    }
                    #[cfg(feature = "metrics")]
                    crate::observability::with_metrics(|m| m.hydration_fallbacks_total.inc());
                    ((self.default_state)(), None, HydrationOutcome::Recovered)
                }
            };

            core.last_persisted_hash = document.as_ref().map(document_hash);
            core.cached_document = document;
            core.state = state;
            core.undo.clear();
            core.redo.clear();
            core.phase = Phase::Hydrated;
            outcome
        };

        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|m| m.hydrations_total.inc());
        info!(key = %self.state_key, ?outcome, "State hydrated");
        self.notify(&HydrationEvent::Hydrated(outcome));
        Ok(outcome)
    }

    fn load(&self, store: &Store, config: &HydrationConfig) -> Result<Loaded<S>> {
        let Some(raw) = store.get(self.state_key.as_str(), true, true)? else {
            return Ok(Loaded::Absent);
        };
        let persisted: PersistedDocument = serde_json::from_value(raw)?;

        let cutoff = config.state_expiration.and_then(expiry_cutoff);
        if let (Some(cutoff), Some(written)) = (cutoff, persisted.timestamp) {
            if written < cutoff {
                debug!(key = %self.state_key, %written, "Stored state expired");
                return Ok(Loaded::Expired);
            }
        }

        let (mut document, stored_version) = self.serializer.decode(&persisted.state)?;
        if let Some(migrate) = &self.migration {
            document = migrate(document, stored_version, config.current_version)?;
        }

        let state: S = serde_json::from_value(document)?;
        let document = serde_json::to_value(&state)?;
        Ok(Loaded::Restored { state, document })
    }

    pub(crate) fn persist(&self, force: bool) -> Result<PersistOutcome> {
        self.persist_with(force, &self.cancelled)
    }

    /// Run one persist cycle, then notify observers once the persist lock is released
    fn persist_with(&self, force: bool, cancel: &AtomicBool) -> Result<PersistOutcome> {
        let result = {
            let _persisting = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.persist_cycle(force, cancel)
        };

        match &result {
            Ok(PersistOutcome::Written { hash }) => {
                self.notify(&HydrationEvent::Persisted { hash: hash.clone() })
            }
            Err(HydrateError::PersistFailed { source, .. }) => {
                self.notify(&HydrationEvent::PersistFailed {
                    error: source.to_string(),
                })
            }
            _ => {}
        }
        result
    }

    fn persist_cycle(&self, force: bool, cancel: &AtomicBool) -> Result<PersistOutcome> {
        let (store, config, document, hash, record) = {
            let core = self.core();
            let store = core.store()?;
            let document = serde_json::to_value(&core.state)?;
            let hash = document_hash(&document);

            if !force && core.last_persisted_hash.as_deref() == Some(hash.as_str()) {
                debug!(key = %self.state_key, "State unchanged; skipping persist");
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.persist_skipped_total.inc());
                return Ok(PersistOutcome::Skipped);
            }

            let persisted = PersistedDocument {
                version: core.config.current_version,
                timestamp: Some(Utc::now()),
                state: self
                    .serializer
                    .serialize(&core.state, core.config.current_version, false)?,
            };
            let record = serde_json::to_value(&persisted)?;
            (store, core.config.clone(), document, hash, record)
        };

        let key = self.state_key.as_str();
        let result = Retry::new("persist", config.retry_policy())
            .cancel_on(cancel)
            .run(|attempt| {
                #[cfg(feature = "metrics")]
                if attempt > 1 {
                    crate::observability::with_metrics(|m| m.persist_retries_total.inc());
                }
                #[cfg(not(feature = "metrics"))]
                let _ = attempt;
                store.put(key, &record, config.use_compression, config.enable_encryption)
            });

        match result {
            Ok(_) => {
                {
                    let mut core = self.core();
                    core.last_persisted_hash = Some(hash.clone());
                    core.cached_document = Some(document);
                }
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.persist_writes_total.inc());
                debug!(key, %hash, "State persisted");
                Ok(PersistOutcome::Written { hash })
            }
            Err(e) => {
                let attempts = e.attempts();
                let source = e.into_source();
                error!(key, attempts, error = %source, "Persist failed");
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.persist_failures_total.inc());
                Err(HydrateError::PersistFailed {
                    attempts,
                    source: Box::new(source),
                })
            }
        }
    }

    pub(crate) fn commit<R>(&self, mutate: impl FnOnce(&mut S) -> R) -> Result<R> {
        self.ready()?;

        let (result, changed) = {
            let mut core = self.core();
            let before = serde_json::to_value(&core.state)?;
            let result = mutate(&mut core.state);
            let after = serde_json::to_value(&core.state)?;

            let changed = before != after;
            if changed {
                core.undo.push(before);
                core.redo.clear();
            }
            (result, changed)
        };

        if changed {
            self.on_mutation();
        }
        Ok(result)
    }

    fn step_history(&self, backwards: bool) -> Result<bool> {
        {
            let mut core = self.core();
            let popped = if backwards {
                core.undo.pop()
            } else {
                core.redo.pop()
            };
            let Some(target) = popped else {
                return Ok(false);
            };

            let current = serde_json::to_value(&core.state)?;
            match serde_json::from_value::<S>(target.clone()) {
                Ok(state) => core.state = state,
                Err(e) => {
                    if backwards {
                        core.undo.push(target);
                    } else {
                        core.redo.push(target);
                    }
                    return Err(e.into());
                }
            }
            if backwards {
                core.redo.push(current);
            } else {
                core.undo.push(current);
            }
        }

        debug!(key = %self.state_key, backwards, "History step applied");
        self.on_mutation();
        Ok(true)
    }

    /// Notify subscribers and re-arm the debounce timer
    fn on_mutation(&self) {
        self.notify(&HydrationEvent::StateChanged);
        let delay = self.core().config.debounce;
        let weak = self.weak();
        self.scheduler.arm_debounce(delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.timer_persist("debounce");
            }
        });
    }

    fn schedule_auto_save(&self) {
        let interval = self.core().config.auto_save_interval;
        let weak = self.weak();
        self.scheduler.set_auto_save(interval, move || {
            if let Some(shared) = weak.upgrade() {
                shared.timer_persist("auto-save");
            }
        });
    }

    /// Persist from a timer; failures are already logged and reported
    fn timer_persist(&self, trigger: &'static str) {
        if self.timers_halted.load(Ordering::SeqCst) || self.core().phase != Phase::Hydrated {
            return;
        }
        debug!(key = %self.state_key, trigger, "Timer persist");
        let _ = self.persist_with(false, &self.timers_halted);
    }

    fn weak(&self) -> Weak<Self> {
        self.this.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_cutoff_in_range() {
        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        let cutoff = expiry_cutoff(Duration::from_secs(3600)).unwrap();
        assert!((cutoff - hour_ago).num_seconds().abs() < 5);
    }

    #[test]
    fn test_expiry_cutoff_beyond_calendar_never_expires() {
        let million_years = Duration::from_secs(1_000_000 * 365 * 24 * 3600);
        assert!(expiry_cutoff(million_years).is_none());
        assert!(expiry_cutoff(Duration::from_millis(u64::MAX)).is_none());
        assert!(expiry_cutoff(Duration::MAX).is_none());
    }
}
