//! Non-reentrant mutual exclusion without a protected value.
//!
//! [`MutexCore`] is a semaphore of capacity one. It does not track which
//! flow holds it: any caller may `exit`, and a second `enter` by the holder
//! waits for itself. Use [`ReentrantLock`](crate::sync::ReentrantLock) when
//! the same flow needs to nest.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::sync::semaphore::SemaphoreCore;

/// Binary lock with blocking and async entry.
///
/// # Example
///
/// ```
/// use dualsync::cancel::CancelToken;
/// use dualsync::sync::MutexCore;
///
/// let mutex = MutexCore::new();
/// mutex.enter(&CancelToken::none())?;
/// assert!(mutex.is_held());
/// mutex.exit()?;
/// # Ok::<(), dualsync::SyncError>(())
/// ```
#[derive(Debug)]
pub struct MutexCore {
    sem: SemaphoreCore,
}

impl MutexCore {
    /// Creates an unheld mutex.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sem: SemaphoreCore::with_permits(1, 1),
        }
    }

    /// Returns true while some caller holds the mutex.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.sem.current_count() == 0
    }

    /// Returns the number of queued callers.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.sem.waiter_count()
    }

    /// Blocks until the mutex is acquired.
    pub fn enter(&self, cancel: &CancelToken) -> Result<()> {
        self.sem.acquire(cancel)
    }

    /// Acquires the mutex if it is free, without waiting.
    pub fn try_enter(&self) -> bool {
        self.sem.try_acquire()
    }

    /// Blocks for at most `timeout`, returning whether the mutex was acquired.
    pub fn try_enter_for(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.sem.try_acquire_for(timeout, cancel)
    }

    /// Waits until the mutex is acquired.
    pub async fn enter_async(&self, cancel: &CancelToken) -> Result<()> {
        self.sem.acquire_async(cancel).await
    }

    /// Waits for at most `timeout`, returning whether the mutex was acquired.
    pub async fn try_enter_for_async(&self, timeout: Duration, cancel: &CancelToken) -> Result<bool> {
        self.sem.try_acquire_for_async(timeout, cancel).await
    }

    /// Releases the mutex, handing it to the oldest waiter if any.
    ///
    /// Fails with [`SyncError::UnbalancedExit`] if the mutex is not held.
    pub fn exit(&self) -> Result<()> {
        self.sem.release().map_err(|err| match err {
            SyncError::UnbalancedRelease { .. } => SyncError::UnbalancedExit,
            other => other,
        })
    }
}

impl Default for MutexCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::test_utils::{init_test_logging, poll_once};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn exit_without_enter_is_unbalanced() {
        init_test("exit_without_enter_is_unbalanced");
        let mutex = MutexCore::new();
        assert_eq!(mutex.exit(), Err(SyncError::UnbalancedExit));
        assert!(!mutex.is_held());
        crate::test_complete!("exit_without_enter_is_unbalanced");
    }

    #[test]
    fn try_enter_fails_while_held() {
        init_test("try_enter_fails_while_held");
        let mutex = MutexCore::new();
        assert!(mutex.try_enter());
        assert!(!mutex.try_enter());
        assert!(!mutex
            .try_enter_for(Duration::ZERO, &CancelToken::none())
            .expect("probe"));
        mutex.exit().expect("exit");
        assert!(mutex.try_enter());
        crate::test_complete!("try_enter_fails_while_held");
    }

    #[test]
    fn timed_enter_times_out_while_held() {
        init_test("timed_enter_times_out_while_held");
        let mutex = MutexCore::new();
        mutex.enter(&CancelToken::none()).expect("enter");
        let got = mutex
            .try_enter_for(Duration::from_millis(15), &CancelToken::none())
            .expect("timed");
        crate::assert_with_log!(!got, "timed out", false, got);
        assert_eq!(mutex.waiter_count(), 0);
        crate::test_complete!("timed_enter_times_out_while_held");
    }

    #[test]
    fn cancelled_token_fails_before_waiting() {
        init_test("cancelled_token_fails_before_waiting");
        let mutex = MutexCore::new();
        let source = CancelSource::new();
        source.cancel();
        let err = mutex.enter(&source.token()).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!mutex.is_held());
        crate::test_complete!("cancelled_token_fails_before_waiting");
    }

    #[test]
    fn async_waiter_is_granted_on_exit() {
        init_test("async_waiter_is_granted_on_exit");
        let mutex = MutexCore::new();
        let none = CancelToken::none();
        mutex.enter(&none).expect("enter");
        let mut waiting = Box::pin(mutex.enter_async(&none));
        assert!(poll_once(&mut waiting).is_none());
        mutex.exit().expect("exit");
        assert!(matches!(poll_once(&mut waiting), Some(Ok(()))));
        assert!(mutex.is_held());
        crate::test_complete!("async_waiter_is_granted_on_exit");
    }

    #[test]
    fn dropping_granted_future_returns_lock() {
        init_test("dropping_granted_future_returns_lock");
        let mutex = MutexCore::new();
        let none = CancelToken::none();
        mutex.enter(&none).expect("enter");
        let mut waiting = Box::pin(mutex.enter_async(&none));
        assert!(poll_once(&mut waiting).is_none());
        mutex.exit().expect("exit");
        drop(waiting);
        assert!(!mutex.is_held(), "grant returned to the mutex");
        crate::test_complete!("dropping_granted_future_returns_lock");
    }

    #[test]
    fn threads_are_mutually_exclusive() {
        init_test("threads_are_mutually_exclusive");
        let mutex = Arc::new(MutexCore::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        mutex.enter(&CancelToken::none()).expect("enter");
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        mutex.exit().expect("exit");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert!(!mutex.is_held());
        crate::test_complete!("threads_are_mutually_exclusive");
    }
}
