//! Manual and auto reset events.
//!
//! - [`ManualResetEvent`]: once set, releases every waiter until reset
//! - [`AutoResetEvent`]: each set releases exactly one waiter
//!
//! A manual event keeps one latch per generation. `reset` only installs a
//! fresh latch when the current one is set, so a waiter that already observed
//! the old latch still sees it set.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::runtime::block_on;
use crate::sync::wait_queue::{WaitOutcome, WaitQueue, WaitQueueGuard, WaitState};
use crate::time::optional_deadline;
use crate::tracing_compat::trace;

#[derive(Debug, Default)]
struct Latch {
    set: bool,
}

impl WaitState for Latch {}

/// Event that stays set until explicitly reset.
///
/// # Example
///
/// ```
/// use dualsync::cancel::CancelToken;
/// use dualsync::sync::ManualResetEvent;
///
/// let event = ManualResetEvent::new(false);
/// event.set();
/// event.wait(&CancelToken::none())?;
/// event.wait(&CancelToken::none())?;
/// event.reset();
/// assert!(!event.is_set());
/// # Ok::<(), dualsync::SyncError>(())
/// ```
#[derive(Debug)]
pub struct ManualResetEvent {
    latch: Mutex<Arc<WaitQueue<Latch>>>,
}

impl ManualResetEvent {
    /// Creates an event, set or not.
    #[must_use]
    pub fn new(initially_set: bool) -> Self {
        Self {
            latch: Mutex::new(Arc::new(WaitQueue::new(Latch { set: initially_set }))),
        }
    }

    /// Returns whether the event is set at this instant.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.latch.lock().lock().set
    }

    /// Returns the number of waiters on the current latch.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.latch.lock().waiter_count()
    }

    /// Sets the event, releasing every waiter. Setting twice is a no-op.
    pub fn set(&self) {
        let current = self.latch.lock();
        let mut queue = current.lock();
        if queue.set {
            return;
        }
        queue.set = true;
        let released = queue.dequeue_all(WaitOutcome::Granted);
        trace!(released, "manual reset event set");
    }

    /// Unsets the event. Resetting an unset event is a no-op.
    pub fn reset(&self) {
        let mut current = self.latch.lock();
        let was_set = current.lock().set;
        if was_set {
            *current = Arc::new(WaitQueue::new(Latch::default()));
            trace!("manual reset event reset");
        }
    }

    /// Blocks until the event is set.
    pub fn wait(&self, cancel: &CancelToken) -> Result<()> {
        block_on(self.wait_inner(None, cancel)).map(|_| ())
    }

    /// Blocks for at most `timeout`, returning whether the event was set.
    pub fn wait_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        block_on(self.wait_inner(Some(timeout), cancel))
    }

    /// Waits until the event is set.
    pub async fn wait_async(&self, cancel: &CancelToken) -> Result<()> {
        self.wait_inner(None, cancel).await.map(|_| ())
    }

    /// Waits for at most `timeout`, returning whether the event was set.
    pub async fn wait_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.wait_inner(Some(timeout), cancel).await
    }

    async fn wait_inner(&self, timeout: Option<Duration>, cancel: &CancelToken) -> Result<bool> {
        let deadline = optional_deadline(timeout)?;
        cancel.checkpoint()?;

        let latch = Arc::clone(&self.latch.lock());
        let waiter = {
            let mut queue = latch.lock();
            if queue.set {
                return Ok(true);
            }
            if timeout == Some(Duration::ZERO) {
                return Ok(false);
            }
            queue.enqueue(cancel, deadline)?
        };
        waiter.await.into_result(cancel)
    }
}

impl Default for ManualResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Default)]
struct Signal {
    signaled: bool,
}

impl Signal {
    fn set(queue: &mut WaitQueueGuard<'_, Self>) {
        if !queue.try_dequeue_one(WaitOutcome::Granted) {
            queue.signaled = true;
        }
    }
}

impl WaitState for Signal {
    fn regrant(queue: &mut WaitQueueGuard<'_, Self>) {
        Self::set(queue);
    }
}

/// Event that releases one waiter per set and then resets itself.
///
/// A set with nobody waiting is remembered until the next wait consumes it;
/// repeated sets without a wait in between collapse into one.
#[derive(Debug, Default)]
pub struct AutoResetEvent {
    queue: WaitQueue<Signal>,
}

impl AutoResetEvent {
    /// Creates an event, signaled or not.
    #[must_use]
    pub fn new(initially_set: bool) -> Self {
        Self {
            queue: WaitQueue::new(Signal {
                signaled: initially_set,
            }),
        }
    }

    /// Returns whether a signal is pending at this instant.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.queue.lock().signaled
    }

    /// Returns the number of queued waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.queue.waiter_count()
    }

    /// Releases the oldest waiter, or leaves the event signaled.
    pub fn set(&self) {
        Signal::set(&mut self.queue.lock());
    }

    /// Clears a pending signal.
    pub fn reset(&self) {
        self.queue.lock().signaled = false;
    }

    /// Blocks until a signal is consumed.
    pub fn wait(&self, cancel: &CancelToken) -> Result<()> {
        block_on(self.wait_inner(None, cancel)).map(|_| ())
    }

    /// Blocks for at most `timeout`, returning whether a signal was consumed.
    pub fn wait_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        block_on(self.wait_inner(Some(timeout), cancel))
    }

    /// Waits until a signal is consumed.
    pub async fn wait_async(&self, cancel: &CancelToken) -> Result<()> {
        self.wait_inner(None, cancel).await.map(|_| ())
    }

    /// Waits for at most `timeout`, returning whether a signal was consumed.
    pub async fn wait_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.wait_inner(Some(timeout), cancel).await
    }

    async fn wait_inner(&self, timeout: Option<Duration>, cancel: &CancelToken) -> Result<bool> {
        let deadline = optional_deadline(timeout)?;
        cancel.checkpoint()?;

        let waiter = {
            let mut queue = self.queue.lock();
            if queue.signaled {
                queue.signaled = false;
                return Ok(true);
            }
            if timeout == Some(Duration::ZERO) {
                return Ok(false);
            }
            queue.enqueue(cancel, deadline)?
        };
        waiter.await.into_result(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::test_utils::{init_test_logging, poll_once};

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn manual_set_releases_everyone() {
        init_test("manual_set_releases_everyone");
        let event = ManualResetEvent::new(false);
        let none = CancelToken::none();
        let mut waits: Vec<_> = (0..3).map(|_| Box::pin(event.wait_async(&none))).collect();
        for wait in &mut waits {
            assert!(poll_once(wait).is_none());
        }
        assert_eq!(event.waiter_count(), 3);

        event.set();
        for wait in &mut waits {
            assert!(matches!(poll_once(wait), Some(Ok(()))));
        }
        assert!(event.wait_for(Duration::ZERO, &none).expect("probe"));
        crate::test_complete!("manual_set_releases_everyone");
    }

    #[test]
    fn manual_set_and_reset_are_idempotent() {
        init_test("manual_set_and_reset_are_idempotent");
        let event = ManualResetEvent::default();
        event.reset();
        assert!(!event.is_set());
        event.set();
        event.set();
        assert!(event.is_set());
        event.reset();
        event.reset();
        assert!(!event.is_set());
        let none = CancelToken::none();
        assert!(!event.wait_for(Duration::from_millis(10), &none).expect("timed"));
        crate::test_complete!("manual_set_and_reset_are_idempotent");
    }

    #[test]
    fn manual_wait_cancelled() {
        init_test("manual_wait_cancelled");
        let event = ManualResetEvent::new(false);
        let source = CancelSource::new();
        let token = source.token();
        let mut wait = Box::pin(event.wait_async(&token));
        assert!(poll_once(&mut wait).is_none());
        source.cancel();
        assert!(poll_once(&mut wait).expect("settled").unwrap_err().is_cancelled());
        assert_eq!(event.waiter_count(), 0);
        crate::test_complete!("manual_wait_cancelled");
    }

    #[test]
    fn auto_set_releases_one() {
        init_test("auto_set_releases_one");
        let event = AutoResetEvent::new(false);
        let none = CancelToken::none();
        let mut first = Box::pin(event.wait_async(&none));
        let mut second = Box::pin(event.wait_async(&none));
        assert!(poll_once(&mut first).is_none());
        assert!(poll_once(&mut second).is_none());

        event.set();
        assert!(matches!(poll_once(&mut first), Some(Ok(()))));
        assert!(poll_once(&mut second).is_none());
        assert!(!event.is_set(), "signal consumed by the waiter");

        event.set();
        assert!(matches!(poll_once(&mut second), Some(Ok(()))));
        crate::test_complete!("auto_set_releases_one");
    }

    #[test]
    fn auto_signal_is_remembered_once() {
        init_test("auto_signal_is_remembered_once");
        let event = AutoResetEvent::new(false);
        let none = CancelToken::none();
        event.set();
        event.set();
        assert!(event.is_set());
        assert!(event.wait_for(Duration::ZERO, &none).expect("probe"));
        assert!(!event.wait_for(Duration::ZERO, &none).expect("probe"));
        crate::test_complete!("auto_signal_is_remembered_once");
    }

    #[test]
    fn auto_reset_clears_signal() {
        init_test("auto_reset_clears_signal");
        let event = AutoResetEvent::new(true);
        event.reset();
        assert!(!event.is_set());
        assert!(!event
            .wait_for(Duration::from_millis(10), &CancelToken::none())
            .expect("timed"));
        crate::test_complete!("auto_reset_clears_signal");
    }

    #[test]
    fn auto_dropped_grant_is_not_lost() {
        init_test("auto_dropped_grant_is_not_lost");
        let event = AutoResetEvent::new(false);
        let none = CancelToken::none();
        let mut abandoned = Box::pin(event.wait_async(&none));
        assert!(poll_once(&mut abandoned).is_none());
        event.set();
        drop(abandoned);
        assert!(event.is_set(), "signal returned to the event");
        crate::test_complete!("auto_dropped_grant_is_not_lost");
    }
}
