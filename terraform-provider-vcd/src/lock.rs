//! Per-process named locks serializing mutations of a shared parent
//!
//! Firewall and NAT rule resources both rewrite the network configuration
//! section of the same vApp. vCD only offers whole-section replacement, so
//! two concurrent writers would silently drop each other's changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Held while a parent is being mutated; the lock is released on drop
#[must_use = "the parent is unlocked as soon as the guard is dropped"]
pub struct ParentGuard {
    key: String,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ParentGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ParentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // The table holds the only reference once nobody waits on the key
        let mut locks = self.table.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.key);
        }
        tracing::debug!(key = %self.key, "released parent lock");
    }
}

/// Lock table keyed by parent identity
#[derive(Default)]
pub struct ParentLocks {
    locks: LockTable,
}

impl ParentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> ParentGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        tracing::debug!(key, "waiting for parent lock");
        let guard = entry.lock_owned().await;
        tracing::debug!(key, "acquired parent lock");

        ParentGuard {
            key: key.to_string(),
            table: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited
    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock key for a vApp; the immutable ID survives concurrent renames
pub fn vapp_lock_key(vapp_id: &str) -> String {
    format!("vapp:{}", vapp_id)
}
