//! Shared key-value store.
//!
//! Both processes talk to the same store; it is the only shared state. The
//! contract is deliberately small: `get`, `set`, and a change subscription
//! with at-least-once delivery to listeners that are currently registered.
//!
//! - [`MemoryStore`]: in-process map, used as the test fake
//! - [`FileStore`]: JSON file shared across processes, with a polling watcher
//!
//! Listeners must treat the change payload as a hint. Notifications can be
//! duplicated or coalesced, so handlers re-read the store before acting.

mod file;
mod memory;

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;

pub use file::{FileStore, WatchHandle};
pub use memory::MemoryStore;

pub type StoreValues = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Changed keys and their before/after values.
pub type StorageChanges = BTreeMap<String, StorageChange>;

pub type ChangeListener = Arc<dyn Fn(&StorageChanges) + Send + Sync>;

pub trait Store: Send + Sync {
    /// Returns the values present for `keys`. Missing keys are omitted.
    fn get(&self, keys: &[&str]) -> Result<StoreValues>;

    /// Merges `values` into the store. Returns once the write is visible to
    /// subsequent reads from this process.
    fn set(&self, values: StoreValues) -> Result<()>;

    fn on_change(&self, listener: ChangeListener);
}

/// Reads a single key.
pub fn get_value(store: &dyn Store, key: &str) -> Result<Option<Value>> {
    Ok(store.get(&[key])?.remove(key))
}

/// Writes a single key.
pub fn set_value(store: &dyn Store, key: &str, value: Value) -> Result<()> {
    let mut values = StoreValues::new();
    values.insert(key.to_string(), value);
    store.set(values)
}

/// Applies `updates` to `current` and reports which keys actually changed.
pub(crate) fn merge_changes(current: &mut StoreValues, updates: StoreValues) -> StorageChanges {
    let mut changes = StorageChanges::new();
    for (key, new_value) in updates {
        let old_value = current.get(&key).cloned();
        if old_value.as_ref() == Some(&new_value) {
            continue;
        }
        current.insert(key.clone(), new_value.clone());
        changes.insert(
            key,
            StorageChange {
                old_value,
                new_value: Some(new_value),
            },
        );
    }
    changes
}

/// Full diff between two snapshots, including removed keys.
pub(crate) fn diff_snapshots(before: &StoreValues, after: &StoreValues) -> StorageChanges {
    let mut changes = StorageChanges::new();
    for (key, new_value) in after {
        let old_value = before.get(key);
        if old_value != Some(new_value) {
            changes.insert(
                key.clone(),
                StorageChange {
                    old_value: old_value.cloned(),
                    new_value: Some(new_value.clone()),
                },
            );
        }
    }
    for (key, old_value) in before {
        if !after.contains_key(key) {
            changes.insert(
                key.clone(),
                StorageChange {
                    old_value: Some(old_value.clone()),
                    new_value: None,
                },
            );
        }
    }
    changes
}

pub(crate) fn select(values: &StoreValues, keys: &[&str]) -> StoreValues {
    keys.iter()
        .filter_map(|key| {
            values
                .get(*key)
                .map(|value| ((*key).to_string(), value.clone()))
        })
        .collect()
}

/// Listener registry shared by the store implementations.
#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<ChangeListener>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: ChangeListener) {
        if let Ok(mut listeners) = self.inner.lock() {
            listeners.push(listener);
        }
    }

    /// Calls every listener without holding the registry lock, so listeners
    /// may read the store or register further listeners.
    pub(crate) fn notify(&self, changes: &StorageChanges) {
        if changes.is_empty() {
            return;
        }
        let listeners = match self.inner.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(changes);
        }
    }
}
