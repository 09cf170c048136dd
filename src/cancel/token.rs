//! Cancel source, token and registration types.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::SyncError;
use crate::time::{deadline_after, TimerHandle, TimerService};
use crate::tracing_compat::debug;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation armed by [`CancelSource::cancel_after`].
    Timeout,
    /// Cancellation because the owning component is shutting down.
    Shutdown,
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

type Callback = Box<dyn FnOnce(CancelKind) + Send>;

struct CancelState {
    kind: Option<CancelKind>,
    message: Option<&'static str>,
    callbacks: Vec<(u64, Callback)>,
    next_id: u64,
}

struct CancelInner {
    requested: AtomicBool,
    state: Mutex<CancelState>,
}

impl CancelInner {
    fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            state: Mutex::new(CancelState {
                kind: None,
                message: None,
                callbacks: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// First reason wins; later calls are no-ops.
    fn cancel(&self, kind: CancelKind, message: Option<&'static str>) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.kind.is_some() {
                return false;
            }
            state.kind = Some(kind);
            state.message = message;
            self.requested.store(true, Ordering::Release);
            std::mem::take(&mut state.callbacks)
        };

        debug!(
            kind = %kind,
            message = message.unwrap_or(""),
            callbacks = callbacks.len(),
            "cancellation requested"
        );

        // Run outside the lock: callbacks take primitive locks of their own.
        for (_, callback) in callbacks {
            callback(kind);
        }
        true
    }

    fn kind(&self) -> Option<CancelKind> {
        if !self.requested.load(Ordering::Acquire) {
            return None;
        }
        self.state.lock().kind
    }
}

/// Owner side of a cancellation signal.
///
/// # Example
///
/// ```
/// use dualsync::cancel::CancelSource;
///
/// let source = CancelSource::new();
/// let token = source.token();
/// assert!(token.checkpoint().is_ok());
///
/// source.cancel();
/// assert!(token.checkpoint().is_err());
/// ```
pub struct CancelSource {
    inner: Arc<CancelInner>,
    timer: Mutex<Option<TimerHandle>>,
}

impl CancelSource {
    /// Creates a source that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner::new()),
            timer: Mutex::new(None),
        }
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Requests cancellation with [`CancelKind::User`].
    ///
    /// Returns false if the source was already cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel(CancelKind::User, None)
    }

    /// Requests cancellation with an explicit kind and message.
    pub fn cancel_with(&self, kind: CancelKind, message: Option<&'static str>) -> bool {
        self.inner.cancel(kind, message)
    }

    /// Arms a timer that cancels with [`CancelKind::Timeout`] after `delay`.
    ///
    /// Re-arming replaces the previous timer. The timer is disarmed when the
    /// source is dropped.
    pub fn cancel_after(&self, delay: Duration) -> Result<(), SyncError> {
        let deadline = deadline_after(delay)?;
        let weak: Weak<CancelInner> = Arc::downgrade(&self.inner);
        let handle = TimerService::global().schedule(
            deadline,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.cancel(CancelKind::Timeout, Some("cancel_after elapsed"));
                }
            }),
        )?;
        *self.timer.lock() = Some(handle);
        Ok(())
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.is_cancel_requested())
            .finish_non_exhaustive()
    }
}

/// Observer side of a cancellation signal.
///
/// Cheap to clone. [`CancelToken::none`] never fires.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Option<Arc<CancelInner>>,
}

impl CancelToken {
    /// A token that can never be cancelled.
    #[must_use]
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Returns true if this token is attached to a source.
    #[must_use]
    pub fn can_be_cancelled(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.requested.load(Ordering::Acquire))
    }

    /// Returns the kind of the cancellation, if requested.
    #[must_use]
    pub fn reason(&self) -> Option<CancelKind> {
        self.inner.as_ref().and_then(|inner| inner.kind())
    }

    /// Returns the message supplied with the cancellation, if any.
    #[must_use]
    pub fn message(&self) -> Option<&'static str> {
        self.inner
            .as_ref()
            .and_then(|inner| inner.state.lock().message)
    }

    /// Checks for cancellation and returns an error if cancelled.
    ///
    /// Convenient with `?`:
    ///
    /// ```
    /// # use dualsync::cancel::CancelToken;
    /// fn step(token: &CancelToken) -> Result<(), dualsync::SyncError> {
    ///     token.checkpoint()?;
    ///     Ok(())
    /// }
    /// assert!(step(&CancelToken::none()).is_ok());
    /// ```
    pub fn checkpoint(&self) -> Result<(), SyncError> {
        match self.reason() {
            Some(kind) => Err(SyncError::Cancelled { kind }),
            None => Ok(()),
        }
    }

    /// Registers a callback to run when the token is cancelled.
    ///
    /// If the token is already cancelled the callback runs immediately on the
    /// calling thread. Dropping the returned registration unregisters the
    /// callback if it has not run yet.
    pub fn register<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce(CancelKind) + Send + 'static,
    {
        let Some(inner) = &self.inner else {
            return CancelRegistration::empty();
        };
        let mut state = inner.state.lock();
        if let Some(kind) = state.kind {
            drop(state);
            callback(kind);
            return CancelRegistration::empty();
        }
        let id = Self::push(&mut state, Box::new(callback));
        CancelRegistration {
            inner: Arc::downgrade(inner),
            id: Some(id),
        }
    }

    /// Registers a callback only if the token has not fired yet.
    ///
    /// Returns `None` without running the callback when the token is already
    /// cancelled, so callers holding a lock the callback needs cannot deadlock.
    pub(crate) fn register_pending<F>(&self, callback: F) -> Option<CancelRegistration>
    where
        F: FnOnce(CancelKind) + Send + 'static,
    {
        let Some(inner) = &self.inner else {
            return Some(CancelRegistration::empty());
        };
        let mut state = inner.state.lock();
        if state.kind.is_some() {
            return None;
        }
        let id = Self::push(&mut state, Box::new(callback));
        Some(CancelRegistration {
            inner: Arc::downgrade(inner),
            id: Some(id),
        })
    }

    fn push(state: &mut CancelState, callback: Callback) -> u64 {
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.callbacks.push((id, callback));
        id
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Scoped registration of a cancellation callback.
///
/// Unregisters on drop.
#[must_use = "dropping the registration unregisters the callback"]
pub struct CancelRegistration {
    inner: Weak<CancelInner>,
    id: Option<u64>,
}

impl CancelRegistration {
    const fn empty() -> Self {
        Self {
            inner: Weak::new(),
            id: None,
        }
    }

    /// Unregisters the callback now.
    ///
    /// Returns true if the callback was still pending.
    pub fn unregister(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        let Some(id) = self.id.take() else {
            return false;
        };
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut state = inner.state.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|(entry, _)| *entry != id);
        state.callbacks.len() != before
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn none_never_cancels() {
        init_test("none_never_cancels");
        let token = CancelToken::none();
        assert!(!token.can_be_cancelled());
        assert!(!token.is_cancel_requested());
        assert!(token.checkpoint().is_ok());
        crate::test_complete!("none_never_cancels");
    }

    #[test]
    fn cancel_fires_callbacks_once() {
        init_test("cancel_fires_callbacks_once");
        let source = CancelSource::new();
        let token = source.token();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let _reg = token.register(move |kind| {
            assert_eq!(kind, CancelKind::User);
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(source.cancel());
        assert!(!source.cancel(), "second cancel is a no-op");
        let count = hits.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "callback count", 1usize, count);
        assert_eq!(token.reason(), Some(CancelKind::User));
        assert!(token.checkpoint().unwrap_err().is_cancelled());
        crate::test_complete!("cancel_fires_callbacks_once");
    }

    #[test]
    fn first_reason_wins() {
        init_test("first_reason_wins");
        let source = CancelSource::new();
        source.cancel_with(CancelKind::Shutdown, Some("closing"));
        source.cancel_with(CancelKind::User, None);
        let token = source.token();
        assert_eq!(token.reason(), Some(CancelKind::Shutdown));
        assert_eq!(token.message(), Some("closing"));
        crate::test_complete!("first_reason_wins");
    }

    #[test]
    fn register_after_cancel_runs_inline() {
        init_test("register_after_cancel_runs_inline");
        let source = CancelSource::new();
        source.cancel();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _reg = source.token().register(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        crate::test_complete!("register_after_cancel_runs_inline");
    }

    #[test]
    fn register_pending_skips_cancelled_token() {
        init_test("register_pending_skips_cancelled_token");
        let source = CancelSource::new();
        source.cancel();
        let registered = source.token().register_pending(|_| {
            panic!("must not run");
        });
        assert!(registered.is_none());
        crate::test_complete!("register_pending_skips_cancelled_token");
    }

    #[test]
    fn dropped_registration_does_not_fire() {
        init_test("dropped_registration_does_not_fire");
        let source = CancelSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let reg = source.token().register(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(reg.unregister());
        source.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        crate::test_complete!("dropped_registration_does_not_fire");
    }

    #[test]
    fn cancel_after_fires_with_timeout_kind() {
        init_test("cancel_after_fires_with_timeout_kind");
        let source = CancelSource::new();
        let token = source.token();
        source
            .cancel_after(Duration::from_millis(20))
            .expect("arm timer");
        let start = Instant::now();
        while !token.is_cancel_requested() {
            assert!(start.elapsed() < Duration::from_secs(5), "timer never fired");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(token.reason(), Some(CancelKind::Timeout));
        crate::test_complete!("cancel_after_fires_with_timeout_kind");
    }
}
