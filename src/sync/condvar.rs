//! Condition variable over any [`Lockable`].
//!
//! A wait enqueues on the condition while the caller still holds the lock,
//! then releases the lock completely, waits, and takes the lock back at its
//! previous depth. Because the enqueue happens before the release, a notify
//! issued by whoever acquires the lock next cannot be missed.
//!
//! The lock is reacquired whatever the outcome of the wait: notified, timed
//! out, or cancelled. Reacquisition cannot be cancelled.
//!
//! Async waits must be polled inside a flow, like async entry into a
//! reentrant lock.
//!
//! Dropping an async wait after it released the lock abandons the lock: the
//! caller's flow no longer holds it when the future is gone.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::flow::FlowContext;
use crate::runtime::block_on;
use crate::sync::lockable::Lockable;
use crate::sync::wait_queue::{WaitOutcome, WaitQueue, WaitQueueGuard, WaitState};
use crate::time::optional_deadline;
use crate::tracing_compat::trace;

#[derive(Debug, Default)]
struct Waiting;

impl WaitState for Waiting {
    fn regrant(queue: &mut WaitQueueGuard<'_, Self>) {
        queue.try_dequeue_one(WaitOutcome::Granted);
    }
}

/// Wait/notify queue bound to a lock at each call.
#[derive(Debug, Default)]
pub struct Condition {
    queue: WaitQueue<Waiting>,
}

impl Condition {
    /// Creates a condition with no waiters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of flows waiting on this condition.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.queue.waiter_count()
    }

    /// Wakes the longest-waiting flow. Returns false if none was waiting.
    pub fn notify(&self) -> bool {
        let woke = self.queue.lock().try_dequeue_one(WaitOutcome::Granted);
        trace!(woke, "condition notify");
        woke
    }

    /// Wakes every waiting flow, returning how many.
    pub fn notify_all(&self) -> usize {
        let woke = self.queue.lock().dequeue_all(WaitOutcome::Granted);
        trace!(woke, "condition notify_all");
        woke
    }

    /// Blocks until notified.
    ///
    /// The caller must hold `lock`; it holds it again on return.
    pub fn wait<L: Lockable + ?Sized>(&self, lock: &L, cancel: &CancelToken) -> Result<()> {
        block_on(self.wait_inner(lock, None, cancel)).map(|_| ())
    }

    /// Blocks until notified or `timeout` passes. Returns false on timeout.
    pub fn wait_for<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool> {
        block_on(self.wait_inner(lock, Some(timeout), cancel))
    }

    /// Waits until notified.
    pub async fn wait_async<L: Lockable + ?Sized>(&self, lock: &L, cancel: &CancelToken) -> Result<()> {
        self.wait_inner(lock, None, cancel).await.map(|_| ())
    }

    /// Waits until notified or `timeout` passes. Returns false on timeout.
    pub async fn wait_for_async<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool> {
        self.wait_inner(lock, Some(timeout), cancel).await
    }

    async fn wait_inner<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let deadline = optional_deadline(timeout)?;
        FlowContext::require_installed()?;
        if !lock.is_entered() {
            return Err(SyncError::NotSynchronized);
        }
        cancel.checkpoint()?;
        if timeout == Some(Duration::ZERO) {
            return Ok(false);
        }

        let waiter = self.queue.lock().enqueue(cancel, deadline)?;
        let suspended = lock.release_for_wait()?;
        let outcome = waiter.await;
        lock.reacquire_after_wait_async(suspended).await?;
        outcome.into_result(cancel)
    }
}
