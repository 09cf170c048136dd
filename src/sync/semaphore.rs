//! Counting semaphore with blocking and async acquisition.
//!
//! Permits are handed over directly: a release with waiters queued settles the
//! oldest waiter as granted instead of incrementing the count, so a newcomer
//! can only take the fast path when nobody is queued.
//!
//! # Example
//!
//! ```
//! use dualsync::cancel::CancelToken;
//! use dualsync::sync::SemaphoreCore;
//!
//! let sem = SemaphoreCore::new(1, 2)?;
//! assert!(sem.try_acquire());
//! assert!(!sem.try_acquire());
//! sem.release()?;
//! sem.acquire(&CancelToken::none())?;
//! # Ok::<(), dualsync::SyncError>(())
//! ```

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::runtime::block_on;
use crate::sync::wait_queue::{WaitOutcome, WaitQueue, WaitQueueGuard, WaitState};
use crate::time::optional_deadline;
use crate::tracing_compat::trace;

#[derive(Debug)]
struct Permits {
    available: usize,
    capacity: usize,
}

impl Permits {
    /// Hands the permit to the oldest waiter, or returns it to the pool.
    fn release(queue: &mut WaitQueueGuard<'_, Self>) -> Result<()> {
        if queue.try_dequeue_one(WaitOutcome::Granted) {
            trace!("permit handed to waiter");
            return Ok(());
        }
        if queue.available >= queue.capacity {
            return Err(SyncError::UnbalancedRelease {
                capacity: queue.capacity,
            });
        }
        queue.available += 1;
        Ok(())
    }
}

impl WaitState for Permits {
    fn regrant(queue: &mut WaitQueueGuard<'_, Self>) {
        // The permit was outstanding, so returning it cannot overflow.
        let _ = Self::release(queue);
    }
}

/// A counting semaphore usable from threads and tasks alike.
#[derive(Debug)]
pub struct SemaphoreCore {
    queue: WaitQueue<Permits>,
}

impl SemaphoreCore {
    /// Creates a semaphore with `initial` permits out of `capacity`.
    ///
    /// Fails if `capacity` is zero or `initial` exceeds it.
    pub fn new(initial: usize, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidArgument("semaphore capacity must be > 0"));
        }
        if initial > capacity {
            return Err(SyncError::InvalidArgument(
                "initial permits must not exceed capacity",
            ));
        }
        Ok(Self::with_permits(initial, capacity))
    }

    pub(crate) fn with_permits(initial: usize, capacity: usize) -> Self {
        Self {
            queue: WaitQueue::new(Permits {
                available: initial,
                capacity,
            }),
        }
    }

    /// Returns the number of permits available right now.
    #[must_use]
    pub fn current_count(&self) -> usize {
        self.queue.lock().available
    }

    /// Returns the maximum number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.lock().capacity
    }

    /// Returns the number of queued acquirers.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.queue.waiter_count()
    }

    /// Takes a permit if one is available without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut queue = self.queue.lock();
        if queue.available > 0 {
            queue.available -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks the calling thread until a permit is acquired.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<()> {
        block_on(self.acquire_async(cancel))
    }

    /// Blocks for at most `timeout`, returning whether a permit was acquired.
    ///
    /// A zero timeout only probes.
    pub fn try_acquire_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        block_on(self.try_acquire_for_async(timeout, cancel))
    }

    /// Waits until a permit is acquired.
    pub async fn acquire_async(&self, cancel: &CancelToken) -> Result<()> {
        self.acquire_inner(None, cancel).await.map(|_| ())
    }

    /// Waits for at most `timeout`, returning whether a permit was acquired.
    pub async fn try_acquire_for_async(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<bool> {
        self.acquire_inner(Some(timeout), cancel).await
    }

    async fn acquire_inner(&self, timeout: Option<Duration>, cancel: &CancelToken) -> Result<bool> {
        let deadline = optional_deadline(timeout)?;
        cancel.checkpoint()?;

        let waiter = {
            let mut queue = self.queue.lock();
            if queue.available > 0 {
                queue.available -= 1;
                return Ok(true);
            }
            if timeout == Some(Duration::ZERO) {
                return Ok(false);
            }
            queue.enqueue(cancel, deadline)?
        };

        waiter.await.into_result(cancel)
    }

    /// Returns a permit, waking the oldest waiter if any.
    ///
    /// Fails with [`SyncError::UnbalancedRelease`] if every permit is
    /// already available.
    pub fn release(&self) -> Result<()> {
        Permits::release(&mut self.queue.lock())
    }
}
