//! The lock surface shared by reentrant locks and monitors.
//!
//! [`Condition`](crate::sync::Condition) waits on anything implementing
//! [`Lockable`]: it needs to know whether the caller holds the lock, to give
//! the lock up completely for the duration of a wait, and to take it back
//! afterwards at the same depth.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::flow::FlowContext;
use crate::tracing_compat::warn;

/// A boxed, sendable future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lock state set aside by [`Lockable::release_for_wait`].
///
/// Reacquiring restores the depth into the flow it was released from, even
/// if the wait resumes on another thread.
#[derive(Debug, Clone)]
#[must_use = "the lock must be reacquired with the suspended state"]
pub struct Suspended {
    flow: FlowContext,
    depth: usize,
}

impl Suspended {
    pub(crate) const fn new(flow: FlowContext, depth: usize) -> Self {
        Self { flow, depth }
    }

    /// Recursion depth the caller held before releasing.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The flow the depth is restored into.
    #[must_use]
    pub const fn flow(&self) -> &FlowContext {
        &self.flow
    }

    pub(crate) fn into_parts(self) -> (FlowContext, usize) {
        (self.flow, self.depth)
    }
}

/// A flow-aware lock with blocking and async entry.
pub trait Lockable: Send + Sync {
    /// Returns true if the current flow holds the lock.
    fn is_entered(&self) -> bool;

    /// Blocks until the lock is held by the current flow.
    fn enter(&self, cancel: &CancelToken) -> Result<()>;

    /// Waits until the lock is held by the current flow.
    ///
    /// Fails with [`SyncError::NoFlow`](crate::SyncError::NoFlow) when polled
    /// without an installed flow.
    fn enter_async<'a>(&'a self, cancel: &'a CancelToken) -> BoxFuture<'a, Result<()>>;

    /// Blocks for at most `timeout`, returning whether the lock was entered.
    fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool>;

    /// Waits for at most `timeout`, returning whether the lock was entered.
    fn try_enter_for_async<'a>(
        &'a self,
        timeout: Duration,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<bool>>;

    /// Leaves the lock once.
    fn exit(&self) -> Result<()>;

    /// Releases every level the current flow holds.
    fn release_for_wait(&self) -> Result<Suspended>;

    /// Blocks until the lock is held again at the suspended depth.
    ///
    /// Not cancellable.
    fn reacquire_after_wait(&self, suspended: Suspended) -> Result<()>;

    /// Waits until the lock is held again at the suspended depth.
    ///
    /// Not cancellable.
    fn reacquire_after_wait_async(&self, suspended: Suspended) -> BoxFuture<'_, Result<()>>;

    /// Enters the lock and returns a guard that exits it on drop.
    fn lock(&self, cancel: &CancelToken) -> Result<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.enter(cancel)?;
        Ok(LockGuard { lock: self })
    }

    /// Async form of [`Lockable::lock`].
    fn lock_async<'a>(
        &'a self,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<LockGuard<'a, Self>>>
    where
        Self: Sized,
    {
        Box::pin(async move {
            self.enter_async(cancel).await?;
            Ok(LockGuard { lock: self })
        })
    }
}

/// Exits its lock when dropped.
///
/// The guard must be dropped in the flow that created it.
#[must_use = "if unused the lock will immediately exit"]
pub struct LockGuard<'a, L: Lockable + ?Sized> {
    lock: &'a L,
}

impl<'a, L: Lockable + ?Sized> LockGuard<'a, L> {
    /// Returns the guarded lock.
    pub fn lock(&self) -> &'a L {
        self.lock
    }
}

impl<L: Lockable + ?Sized> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.exit() {
            warn!(error = %err, "lock guard failed to exit its lock");
        }
    }
}

impl<L: Lockable + ?Sized> fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}
