//! Logical flows of execution.
//!
//! A [`FlowContext`] is the storage a reentrant lock uses to remember how
//! deep the current caller has entered it. It follows the caller rather than
//! the OS thread: synchronous code runs in the flow of its thread (or in the
//! flow installed by [`FlowContext::run`]), and a future wrapped by
//! [`FlowContext::scope`] carries its flow into every poll, whichever thread
//! performs it.
//!
//! Reentrant async operations refuse to run without an installed flow: a
//! task polled by a foreign executor shares its thread with unrelated tasks,
//! so the thread's root flow cannot stand in for it. Blocking calls install
//! the thread's root flow for the duration of the call.
//!
//! Propagation is one-directional. [`FlowContext::fork`] copies the values
//! of a flow into a new one; changes made in the copy stay there until they
//! are explicitly committed back with [`FlowContext::commit_into`].
//!
//! ```
//! use dualsync::flow::FlowContext;
//!
//! let parent = FlowContext::new();
//! let child = parent.fork();
//! assert!(!child.ptr_eq(&parent));
//! child.commit_into(&parent);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use pin_project::pin_project;

use crate::error::{Result, SyncError};

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);
static NEXT_FLOW: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_FLOW: RefCell<Option<FlowContext>> = const { RefCell::new(None) };
    static THREAD_ROOT: FlowContext = FlowContext::new();
}

/// Allocates a slot key unique within the process.
pub(crate) fn next_slot() -> u64 {
    NEXT_SLOT.fetch_add(1, Ordering::Relaxed)
}

struct FlowFrame {
    id: u64,
    values: Mutex<HashMap<u64, usize>>,
}

/// Handle to a logical flow's storage.
///
/// Clones share the same storage.
#[derive(Clone)]
pub struct FlowContext {
    frame: Arc<FlowFrame>,
}

impl FlowContext {
    /// Creates an empty flow.
    #[must_use]
    pub fn new() -> Self {
        Self::with_values(HashMap::new())
    }

    fn with_values(values: HashMap<u64, usize>) -> Self {
        Self {
            frame: Arc::new(FlowFrame {
                id: NEXT_FLOW.fetch_add(1, Ordering::Relaxed),
                values: Mutex::new(values),
            }),
        }
    }

    /// Returns the flow of the caller.
    ///
    /// Inside [`FlowContext::run`] or a polled [`FlowScoped`] this is the
    /// installed flow; otherwise it is the root flow of the current thread.
    #[must_use]
    pub fn current() -> Self {
        Self::installed().unwrap_or_else(|| THREAD_ROOT.with(Clone::clone))
    }

    /// Returns the explicitly installed flow, if any.
    ///
    /// Unlike [`FlowContext::current`] this never falls back to the thread's
    /// root flow.
    #[must_use]
    pub fn installed() -> Option<Self> {
        CURRENT_FLOW.with(|slot| slot.borrow().clone())
    }

    /// Returns the installed flow or fails with [`SyncError::NoFlow`].
    pub(crate) fn require_installed() -> Result<Self> {
        Self::installed().ok_or(SyncError::NoFlow)
    }

    /// Installs this flow as current until the guard is dropped.
    #[must_use]
    pub fn enter(&self) -> FlowGuard {
        let prev = CURRENT_FLOW.with(|slot| slot.borrow_mut().replace(self.clone()));
        FlowGuard { prev }
    }

    /// Runs `f` with this flow installed as current.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }

    /// Wraps `future` so that it runs in this flow on every poll.
    pub fn scope<F: Future>(self, future: F) -> FlowScoped<F> {
        FlowScoped {
            future,
            flow: self,
            parent: None,
        }
    }

    /// Creates a new flow starting with a copy of this flow's values.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::with_values(self.frame.values.lock().clone())
    }

    /// Replaces the values of `parent` with the values of this flow.
    pub fn commit_into(&self, parent: &Self) {
        if self.ptr_eq(parent) {
            return;
        }
        let values = self.frame.values.lock().clone();
        *parent.frame.values.lock() = values;
    }

    /// Returns true if both handles refer to the same flow.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame)
    }

    /// Returns a process-unique identifier for this flow.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.frame.id
    }

    pub(crate) fn get(&self, slot: u64) -> usize {
        self.frame.values.lock().get(&slot).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn set(&self, slot: u64, value: usize) {
        let mut values = self.frame.values.lock();
        if value == 0 {
            values.remove(&slot);
        } else {
            values.insert(slot, value);
        }
    }

    /// Applies `f` to the value in `slot` atomically with respect to other
    /// accesses of this flow, returning `f`'s result.
    pub(crate) fn update<R>(&self, slot: u64, f: impl FnOnce(&mut usize) -> R) -> R {
        let mut values = self.frame.values.lock();
        let mut value = values.get(&slot).copied().unwrap_or(0);
        let out = f(&mut value);
        if value == 0 {
            values.remove(&slot);
        } else {
            values.insert(slot, value);
        }
        out
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("id", &self.frame.id)
            .field("slots", &self.frame.values.lock().len())
            .finish()
    }
}

/// Restores the previously current flow on drop.
#[must_use = "the flow is uninstalled when the guard is dropped"]
pub struct FlowGuard {
    prev: Option<FlowContext>,
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_FLOW.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

impl fmt::Debug for FlowGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowGuard").finish_non_exhaustive()
    }
}

/// Future returned by [`FlowContext::scope`] and [`fork`].
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct FlowScoped<F> {
    #[pin]
    future: F,
    flow: FlowContext,
    parent: Option<FlowContext>,
}

impl<F> FlowScoped<F> {
    /// Commits the scoped flow into the caller's flow when the future
    /// completes.
    ///
    /// The caller's flow is the one current when this method is called.
    pub fn committing(mut self) -> Self {
        self.parent = Some(FlowContext::current());
        self
    }

    /// Returns the flow this future runs in.
    pub fn flow(&self) -> &FlowContext {
        &self.flow
    }
}

impl<F: Future> Future for FlowScoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = {
            let _guard = this.flow.enter();
            this.future.poll(cx)
        };
        if output.is_ready() {
            if let Some(parent) = this.parent.take() {
                this.flow.commit_into(&parent);
            }
        }
        output
    }
}

impl<F> fmt::Debug for FlowScoped<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowScoped")
            .field("flow", &self.flow)
            .field("committing", &self.parent.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs `future` in a fork of the current flow.
///
/// Lock depth acquired inside the future stays in the fork unless the
/// result is made [`committing`](FlowScoped::committing).
pub fn fork<F: Future>(future: F) -> FlowScoped<F> {
    FlowContext::current().fork().scope(future)
}
