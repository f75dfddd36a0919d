//! In-memory store.
//!
//! Same contract as the file store, minus durability. Tests inject it in
//! place of a real persistence backend; `fail_next` simulates an
//! unavailable store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{merge_changes, select, ChangeListener, Listeners, Store, StoreValues};
use crate::error::{GateError, Result};

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<StoreValues>,
    listeners: Listeners,
    failures: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` store operations fail with an I/O error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StoreValues {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }

    fn check_available(&self, op: &str) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(GateError::io(
                format!("memory store {}", op),
                std::io::Error::other("store unavailable"),
            ));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<StoreValues> {
        self.check_available("get")?;
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(select(&values, keys))
    }

    fn set(&self, updates: StoreValues) -> Result<()> {
        self.check_available("set")?;
        let changes = {
            let mut values = self.values.lock().map_err(|_| poisoned())?;
            merge_changes(&mut values, updates)
        };
        self.listeners.notify(&changes);
        Ok(())
    }

    fn on_change(&self, listener: ChangeListener) {
        self.listeners.add(listener);
    }
}

fn poisoned() -> GateError {
    GateError::io(
        "memory store",
        std::io::Error::other("store mutex poisoned"),
    )
}
