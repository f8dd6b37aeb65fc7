//! Keyed mutual exclusion for cache records.
//!
//! Every compile request for the same cache record must run alone: two
//! concurrent requests for one file would otherwise interleave their record
//! and branch writes. [`LockRegistry::run`] queues tasks per key and runs
//! them strictly one at a time, in submission order, while distinct keys
//! proceed fully in parallel. A key whose queue drains is evicted from the
//! registry immediately, so the map never grows with the number of files
//! ever compiled, only with the number currently in flight.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry of per-key fair locks.
///
/// Owned by the server instance and constructor-injected into the compile
/// service; nothing here is process-global.
#[derive(Default)]
pub struct LockRegistry {
    slots: DashMap<String, Arc<Slot>>,
}

#[derive(Default)]
struct Slot {
    /// tokio's async mutex hands the lock to waiters in FIFO order, which
    /// is exactly the submission-order guarantee callers rely on.
    mutex: Mutex<()>,
    /// Tasks running or waiting on this slot. Only ever changed while the
    /// owning map shard is locked, see `checkout`.
    pending: AtomicUsize,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Run `task` while holding the lock for `key`.
    ///
    /// The task's output is returned as-is: a task that fails simply hands
    /// its error to its own caller and the next queued task runs unaffected.
    pub async fn run<F, T>(&self, key: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let checkout = SlotCheckout::acquire(self, key);
        let guard = checkout.slot.mutex.lock().await;
        let out = task.await;
        drop(guard);
        out
        // checkout drops here: pending is decremented and the slot evicted
        // if nothing else runs or waits on it, even if `task` panicked.
    }

    /// Whether a slot currently exists for `key`. A `false` after all work
    /// settled is the eviction guarantee tests rely on.
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of keys with running or queued tasks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Checked-out slot reference; restores the pending count on drop.
struct SlotCheckout<'a> {
    registry: &'a LockRegistry,
    key: &'a str,
    slot: Arc<Slot>,
}

impl<'a> SlotCheckout<'a> {
    fn acquire(registry: &'a LockRegistry, key: &'a str) -> Self {
        // The increment happens while the entry (and therefore the map
        // shard) is locked. Eviction also runs under the shard lock, so it
        // can never observe the slot between "handed out" and "counted".
        let slot = {
            let entry = registry.slots.entry(key.to_string()).or_default();
            entry.value().pending.fetch_add(1, Ordering::SeqCst);
            entry.value().clone()
        };
        Self {
            registry,
            key,
            slot,
        }
    }
}

impl Drop for SlotCheckout<'_> {
    fn drop(&mut self) {
        if self.slot.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last one out removes the slot, unless a newcomer snuck in
            // under the shard lock since the decrement.
            self.registry
                .slots
                .remove_if(self.key, |_, slot| {
                    slot.pending.load(Ordering::SeqCst) == 0
                });
        }
    }
}
