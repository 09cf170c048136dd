//! Reentrant lock keyed by logical flow.
//!
//! A [`ReentrantLock`] pairs a [`MutexCore`] with a [`RecursionTracker`].
//! A flow that already holds the lock re-enters by bumping its depth; it never
//! suspends, so once started it cannot be interrupted. An already-cancelled
//! token still fails the call before anything changes. A first entry waits
//! on the mutex and only records its depth once the mutex is really held, so
//! a cancelled or dropped entry leaves no depth behind.
//!
//! # Example
//!
//! ```
//! use dualsync::cancel::CancelToken;
//! use dualsync::sync::ReentrantLock;
//!
//! let lock = ReentrantLock::new();
//! let none = CancelToken::none();
//! lock.enter(&none)?;
//! lock.enter(&none)?;
//! assert_eq!(lock.depth(), 2);
//! lock.exit()?;
//! lock.exit()?;
//! assert!(!lock.is_held());
//! # Ok::<(), dualsync::SyncError>(())
//! ```

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::flow::FlowContext;
use crate::runtime::block_on;
use crate::sync::lockable::{BoxFuture, Lockable, Suspended};
use crate::sync::mutex::MutexCore;
use crate::sync::recursion::RecursionTracker;
use crate::time::deadline_after;
use crate::tracing_compat::trace;

/// A lock the same flow may enter repeatedly.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    core: MutexCore,
    tracker: RecursionTracker,
}

impl ReentrantLock {
    /// Creates an unheld lock limited by the configured recursion depth.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unheld lock with an explicit recursion ceiling.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            core: MutexCore::new(),
            tracker: RecursionTracker::with_limit(limit),
        }
    }

    /// Returns true if the current flow holds the lock.
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.tracker.is_entered()
    }

    /// Returns how many times the current flow has entered.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tracker.depth()
    }

    /// Returns true while any flow holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.core.is_held()
    }

    /// Returns the number of flows waiting for the lock.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.core.waiter_count()
    }

    /// Blocks until the current flow holds the lock.
    pub fn enter(&self, cancel: &CancelToken) -> Result<()> {
        block_on(self.enter_async(cancel))
    }

    /// Enters if possible without waiting.
    pub fn try_enter(&self) -> Result<bool> {
        if self.tracker.is_entered() {
            self.tracker.enter()?;
            return Ok(true);
        }
        let entry = self.tracker.fork_enter()?;
        if self.core.try_enter() {
            entry.commit();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Blocks for at most `timeout`, returning whether the lock was entered.
    pub fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        block_on(self.try_enter_for_async(timeout, cancel))
    }

    /// Waits until the current flow holds the lock.
    ///
    /// Must be polled inside a flow: wrap the future with
    /// [`FlowContext::scope`] or [`flow::fork`](crate::flow::fork).
    /// Otherwise it fails with [`SyncError::NoFlow`].
    pub async fn enter_async(&self, cancel: &CancelToken) -> Result<()> {
        let flow = FlowContext::require_installed()?;
        cancel.checkpoint()?;
        if self.tracker.depth_in(&flow) > 0 {
            self.tracker.enter_in(&flow)?;
            return Ok(());
        }
        let entry = self.tracker.fork_enter_in(flow)?;
        self.core.enter_async(cancel).await?;
        entry.commit();
        trace!("reentrant lock acquired");
        Ok(())
    }

    /// Waits for at most `timeout`, returning whether the lock was entered.
    ///
    /// Has the same flow requirement as [`ReentrantLock::enter_async`].
    pub async fn try_enter_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        deadline_after(timeout)?;
        let flow = FlowContext::require_installed()?;
        cancel.checkpoint()?;
        if self.tracker.depth_in(&flow) > 0 {
            self.tracker.enter_in(&flow)?;
            return Ok(true);
        }
        let entry = self.tracker.fork_enter_in(flow)?;
        if self.core.try_enter_for_async(timeout, cancel).await? {
            entry.commit();
            trace!("reentrant lock acquired");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Leaves the lock once, releasing it when the depth reaches zero.
    pub fn exit(&self) -> Result<()> {
        if self.tracker.exit()? {
            self.core.exit()?;
            trace!("reentrant lock released");
        }
        Ok(())
    }

    async fn reacquire(&self, suspended: Suspended) -> Result<()> {
        let (flow, depth) = suspended.into_parts();
        let entry = self.tracker.fork_restore(flow, depth);
        let none = CancelToken::none();
        self.core.enter_async(&none).await?;
        entry.commit();
        Ok(())
    }
}

impl Lockable for ReentrantLock {
    fn is_entered(&self) -> bool {
        ReentrantLock::is_entered(self)
    }

    fn enter(&self, cancel: &CancelToken) -> Result<()> {
        ReentrantLock::enter(self, cancel)
    }

    fn enter_async<'a>(&'a self, cancel: &'a CancelToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(ReentrantLock::enter_async(self, cancel))
    }

    fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        ReentrantLock::try_enter_for(self, timeout, cancel)
    }

    fn try_enter_for_async<'a>(
        &'a self,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(ReentrantLock::try_enter_for_async(self, timeout, cancel))
    }

    fn exit(&self) -> Result<()> {
        ReentrantLock::exit(self)
    }

    fn release_for_wait(&self) -> Result<Suspended> {
        let flow = FlowContext::current();
        if self.tracker.depth_in(&flow) == 0 {
            return Err(SyncError::NotSynchronized);
        }
        let depth = self.tracker.suspend_in(&flow);
        self.core.exit()?;
        Ok(Suspended::new(flow, depth))
    }

    fn reacquire_after_wait(&self, suspended: Suspended) -> Result<()> {
        block_on(self.reacquire(suspended))
    }

    fn reacquire_after_wait_async(&self, suspended: Suspended) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.reacquire(suspended))
    }
}
