//! Per-device mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use iotagent_core::DeviceKey;

type LockMap = DashMap<DeviceKey, Arc<Mutex<()>>>;

/// Async locks keyed by device.
///
/// Entries are created on demand and dropped again once no task holds or
/// waits for them.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<LockMap>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a device.
    pub async fn lock(&self, key: &DeviceKey) -> DeviceGuard {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        DeviceGuard {
            key: key.clone(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one device key, released on drop.
#[derive(Debug)]
pub struct DeviceGuard {
    key: DeviceKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl DeviceGuard {
    pub fn key(&self) -> &DeviceKey {
        &self.key
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters clone the Arc under the shard lock, so a count of one means
        // nobody else can reach this mutex.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
