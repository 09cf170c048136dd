//! Monitors: a reentrant lock and its condition behind one object.
//!
//! [`Monitor::for_object`] attaches a monitor to any `Arc`-owned value through
//! the process-wide [`MonitorRegistry`]. The registry keys entries by the
//! value's address and holds only a weak reference to it, so a monitor never
//! keeps its key alive. Entries whose key is gone are pruned whenever a new
//! entry lands in their shard, or on demand with [`MonitorRegistry::purge`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dualsync::cancel::CancelToken;
//! use dualsync::sync::Monitor;
//!
//! let shared = Arc::new(String::from("resource"));
//! let monitor = Monitor::for_object(&shared);
//! assert!(Arc::ptr_eq(&monitor, &Monitor::for_object(&shared)));
//!
//! monitor.enter(&CancelToken::none())?;
//! assert_eq!(monitor.notify_all()?, 0);
//! monitor.exit()?;
//! # Ok::<(), dualsync::SyncError>(())
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::RwLock;

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::sync::condvar::Condition;
use crate::sync::lockable::{BoxFuture, Lockable, Suspended};
use crate::sync::reentrant::ReentrantLock;
use crate::tracing_compat::debug;

/// Reentrant lock with an attached condition.
#[derive(Debug, Default)]
pub struct Monitor {
    lock: ReentrantLock,
    condition: Condition,
}

impl Monitor {
    /// Creates an unheld monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the monitor attached to `object`, creating it on first use.
    pub fn for_object<T: Send + Sync + 'static>(object: &Arc<T>) -> Arc<Self> {
        MonitorRegistry::global().get_or_create(object)
    }

    /// Returns true if the current flow holds the monitor.
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.lock.is_entered()
    }

    /// Returns how many times the current flow has entered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock.depth()
    }

    /// Returns true while any flow holds the monitor.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    /// Returns the number of flows waiting to enter.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.lock.waiter_count()
    }

    /// Returns the number of flows waiting for a notification.
    #[must_use]
    pub fn condition_waiter_count(&self) -> usize {
        self.condition.waiter_count()
    }

    /// Blocks until the current flow holds the monitor.
    pub fn enter(&self, cancel: &CancelToken) -> Result<()> {
        self.lock.enter(cancel)
    }

    /// Enters if possible without waiting.
    pub fn try_enter(&self) -> Result<bool> {
        self.lock.try_enter()
    }

    /// Blocks for at most `timeout`, returning whether the monitor was entered.
    pub fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.lock.try_enter_for(timeout, cancel)
    }

    /// Waits until the current flow holds the monitor.
    pub async fn enter_async(&self, cancel: &CancelToken) -> Result<()> {
        self.lock.enter_async(cancel).await
    }

    /// Waits for at most `timeout`, returning whether the monitor was entered.
    pub async fn try_enter_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.lock.try_enter_for_async(timeout, cancel).await
    }

    /// Leaves the monitor once.
    pub fn exit(&self) -> Result<()> {
        self.lock.exit()
    }

    /// Blocks until notified. The caller must hold the monitor.
    pub fn wait(&self, cancel: &CancelToken) -> Result<()> {
        self.condition.wait(&self.lock, cancel)
    }

    /// Blocks until notified or `timeout` passes. Returns false on timeout.
    pub fn wait_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.condition.wait_for(&self.lock, timeout, cancel)
    }

    /// Waits until notified. The caller must hold the monitor.
    pub async fn wait_async(&self, cancel: &CancelToken) -> Result<()> {
        self.condition.wait_async(&self.lock, cancel).await
    }

    /// Waits until notified or `timeout` passes. Returns false on timeout.
    pub async fn wait_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.condition
            .wait_for_async(&self.lock, timeout, cancel)
            .await
    }

    /// Wakes the longest-waiting flow. The caller must hold the monitor.
    pub fn notify(&self) -> Result<bool> {
        if !self.is_entered() {
            return Err(SyncError::NotSynchronized);
        }
        Ok(self.condition.notify())
    }

    /// Wakes every waiting flow. The caller must hold the monitor.
    pub fn notify_all(&self) -> Result<usize> {
        if !self.is_entered() {
            return Err(SyncError::NotSynchronized);
        }
        Ok(self.condition.notify_all())
    }
}

impl Lockable for Monitor {
    fn is_entered(&self) -> bool {
        self.lock.is_entered()
    }

    fn enter(&self, cancel: &CancelToken) -> Result<()> {
        self.lock.enter(cancel)
    }

    fn enter_async<'a>(&'a self, cancel: &'a CancelToken) -> BoxFuture<'a, Result<()>> {
        Lockable::enter_async(&self.lock, cancel)
    }

    fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.lock.try_enter_for(timeout, cancel)
    }

    fn try_enter_for_async<'a>(
        &'a self,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<bool>> {
        Lockable::try_enter_for_async(&self.lock, timeout, cancel)
    }

    fn exit(&self) -> Result<()> {
        self.lock.exit()
    }

    fn release_for_wait(&self) -> Result<Suspended> {
        self.lock.release_for_wait()
    }

    fn reacquire_after_wait(&self, suspended: Suspended) -> Result<()> {
        self.lock.reacquire_after_wait(suspended)
    }

    fn reacquire_after_wait_async(&self, suspended: Suspended) -> BoxFuture<'_, Result<()>> {
        self.lock.reacquire_after_wait_async(suspended)
    }
}

static GLOBAL_REGISTRY: OnceLock<MonitorRegistry> = OnceLock::new();

struct Entry {
    key: Weak<dyn Any + Send + Sync>,
    monitor: Arc<Monitor>,
}

impl Entry {
    fn is_alive(&self) -> bool {
        self.key.strong_count() > 0
    }
}

type Shard = RwLock<HashMap<usize, Entry>>;

/// Weak-keyed map from object identity to its [`Monitor`].
///
/// An entry's weak reference keeps the key's allocation reserved, so an
/// address is never reused for a different key while its entry exists.
/// The allocation includes the key's value, so a dropped key's memory stays
/// resident until its entry is pruned. Every insert prunes its shard, and
/// [`MonitorRegistry::purge`] prunes all of them.
pub struct MonitorRegistry {
    shards: Box<[Shard]>,
}

impl MonitorRegistry {
    /// Creates a registry with `shards` independently locked buckets,
    /// rounded up to a power of two.
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    /// Returns the process-wide registry used by [`Monitor::for_object`].
    pub fn global() -> &'static Self {
        GLOBAL_REGISTRY.get_or_init(|| Self::new(SyncConfig::global().monitor_shards))
    }

    fn shard(&self, addr: usize) -> &Shard {
        // Low bits are alignment; mix them out before masking.
        let index = (addr >> 4) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Returns the monitor for `key`, creating it if needed.
    ///
    /// Concurrent callers for the same key receive the same monitor.
    pub fn get_or_create<T: Send + Sync + 'static>(&self, key: &Arc<T>) -> Arc<Monitor> {
        let addr = Arc::as_ptr(key).cast::<()>() as usize;
        let shard = self.shard(addr);

        if let Some(entry) = shard.read().get(&addr) {
            return Arc::clone(&entry.monitor);
        }

        let mut map = shard.write();
        if let Some(entry) = map.get(&addr) {
            return Arc::clone(&entry.monitor);
        }
        let before = map.len();
        map.retain(|_, entry| entry.is_alive());
        if map.len() < before {
            debug!(removed = before - map.len(), "dead monitor keys pruned");
        }
        let monitor = Arc::new(Monitor::new());
        let weak: Weak<T> = Arc::downgrade(key);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        map.insert(
            addr,
            Entry {
                key: weak,
                monitor: Arc::clone(&monitor),
            },
        );
        debug!(addr, entries = map.len(), "monitor created");
        monitor
    }

    /// Returns the monitor for `key` if one exists.
    pub fn get<T: Send + Sync + 'static>(&self, key: &Arc<T>) -> Option<Arc<Monitor>> {
        let addr = Arc::as_ptr(key).cast::<()>() as usize;
        self.shard(addr)
            .read()
            .get(&addr)
            .map(|entry| Arc::clone(&entry.monitor))
    }

    /// Returns the number of entries whose key is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().values().filter(|e| e.is_alive()).count())
            .sum()
    }

    /// Returns true if no live entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries whose key is gone, returning how many were removed.
    pub fn purge(&self) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, entry| entry.is_alive());
            removed += before - map.len();
        }
        if removed > 0 {
            debug!(removed, "monitor registry purged");
        }
        removed
    }
}

impl fmt::Debug for MonitorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorRegistry")
            .field("shards", &self.shards.len())
            .field("live", &self.len())
            .finish()
    }
}
