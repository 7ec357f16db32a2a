//! Per-key async mutual exclusion.
//!
//! [`KeyedLocks`] hands out one async mutex per key, created on first use and
//! dropped when the last holder or waiter releases it. Work for one key is
//! serialized; work for different keys proceeds in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type LockTable<K> = Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>;

/// A table of async mutexes keyed by `K`.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    table: Arc<LockTable<K>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters are served in FIFO order (tokio's mutex is fair).
    ///
    /// Dropping the returned future before it resolves still releases the
    /// key's table entry.
    pub async fn lock(&self, key: K) -> KeyedLockGuard<K> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(key.clone()).or_default())
        };
        // Built before the wait so its drop cleans up if the wait is abandoned.
        let mut guard = KeyedLockGuard {
            key: Some(key),
            guard: None,
            table: Arc::clone(&self.table),
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn active_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

/// Exclusive access to one key. Released on drop.
#[derive(Debug)]
pub struct KeyedLockGuard<K: Eq + Hash + Clone> {
    key: Option<K>,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable<K>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedLockGuard<K> {
    fn drop(&mut self) {
        // Release the mutex before inspecting the table so the count below
        // only sees the table's own reference and any waiters.
        drop(self.guard.take());
        if let Some(key) = self.key.take() {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            if table.get(&key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
                table.remove(&key);
            }
        }
    }
}
