//! Per-key mutual exclusion.
//!
//! Every read-modify-write of a blob runs under its key's lock so that
//! version checks and replacements are serialized. Slots are created on
//! demand and garbage-collected once the last holder or waiter is gone;
//! contention on one key never stalls another.

use corkboard_core::Key;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of per-key locks.
#[derive(Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<Key, Slot>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, suspending until it is free.
    ///
    /// tokio's mutex queues waiters, so every waiter eventually acquires.
    pub async fn acquire(&self, key: &Key) -> KeyGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().expect("key lock registry poisoned");
            slots.entry(key.clone()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        KeyGuard {
            registry: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of live slots. Slots for released, uncontended keys are gone.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().expect("key lock registry poisoned").len()
    }
}

/// Holds one key's lock; releasing it garbage-collects the slot when no
/// other task is holding or waiting on it.
pub struct KeyGuard<'a> {
    registry: &'a KeyLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // The registry map stays locked across the release so no new
        // acquirer can clone the slot between the drop and the count check.
        let mut slots = self
            .registry
            .slots
            .lock()
            .expect("key lock registry poisoned");
        self.guard.take();
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}
