//! FIFO queue of pending waiters shared by every primitive.
//!
//! A [`WaitQueue`] owns the one lock of its primitive: the waiter list and the
//! primitive's own fields (`S`) live behind the same mutex, so a blocking
//! caller and an async caller always observe one consistent state machine.
//!
//! Each waiter is a single-assignment slot. It is settled exactly once, by
//! whichever comes first of:
//!
//! - a releaser dequeuing it with [`WaitOutcome::Granted`]
//! - its cancellation token firing ([`WaitOutcome::Cancelled`])
//! - its deadline passing ([`WaitOutcome::TimedOut`])
//!
//! All three paths take the queue lock before touching the slot, so a
//! release racing a cancellation resolves exactly once. Settling a slot twice
//! is a bug in this crate and panics.
//!
//! Dropping a [`Waiter`] before it observed its outcome cancels it. If the
//! drop lost the race against a grant, the grant is handed back through
//! [`WaitState::regrant`] so the wakeup is not swallowed.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::cancel::{CancelKind, CancelRegistration, CancelToken};
use crate::error::SyncError;
use crate::time::{TimerHandle, TimerService};
use crate::tracing_compat::{debug, trace};

/// How a waiter was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOutcome {
    /// A releaser handed the resource to this waiter.
    Granted,
    /// The deadline passed first.
    TimedOut,
    /// The caller's cancellation token fired first.
    Cancelled,
}

impl WaitOutcome {
    /// Maps the outcome to the `Result<bool>` shape of timed operations.
    pub(crate) fn into_result(self, cancel: &CancelToken) -> Result<bool, SyncError> {
        match self {
            Self::Granted => Ok(true),
            Self::TimedOut => Ok(false),
            Self::Cancelled => Err(SyncError::Cancelled {
                kind: cancel.reason().unwrap_or(CancelKind::User),
            }),
        }
    }
}

/// Primitive state stored next to the waiter list.
pub trait WaitState: Send + 'static {
    /// Passes on a grant whose waiter was dropped before observing it.
    ///
    /// Called with the queue locked. The default discards the grant, which is
    /// right for broadcast-style primitives.
    fn regrant(queue: &mut WaitQueueGuard<'_, Self>)
    where
        Self: Sized,
    {
        let _ = queue;
    }
}

impl WaitState for () {}

struct WaiterSlot {
    outcome: Option<WaitOutcome>,
    waker: Option<Waker>,
}

struct WaiterCell {
    id: u64,
    slot: Mutex<WaiterSlot>,
}

impl WaiterCell {
    fn new(id: u64) -> Self {
        Self {
            id,
            slot: Mutex::new(WaiterSlot {
                outcome: None,
                waker: None,
            }),
        }
    }

    /// Stores the outcome and returns the waker to notify.
    fn settle(&self, outcome: WaitOutcome) -> Option<Waker> {
        let mut slot = self.slot.lock();
        assert!(
            slot.outcome.is_none(),
            "waiter {} settled twice (was {:?}, now {:?})",
            self.id,
            slot.outcome,
            outcome
        );
        slot.outcome = Some(outcome);
        slot.waker.take()
    }

    fn outcome(&self) -> Option<WaitOutcome> {
        self.slot.lock().outcome
    }
}

struct QueueState<S> {
    waiters: VecDeque<Arc<WaiterCell>>,
    next_id: u64,
    state: S,
}

type Shared<S> = Arc<Mutex<QueueState<S>>>;

/// FIFO wait queue guarding a primitive's state `S`.
pub struct WaitQueue<S> {
    shared: Shared<S>,
}

impl<S: WaitState> WaitQueue<S> {
    /// Creates an empty queue around `state`.
    pub fn new(state: S) -> Self {
        Self {
            shared: Arc::new(Mutex::new(QueueState {
                waiters: VecDeque::new(),
                next_id: 0,
                state,
            })),
        }
    }

    /// Locks the queue and the primitive state.
    pub fn lock(&self) -> WaitQueueGuard<'_, S> {
        WaitQueueGuard::new(&self.shared)
    }

    /// Returns the number of queued waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.shared.lock().waiters.len()
    }
}

impl<S: WaitState + Default> Default for WaitQueue<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: fmt::Debug> fmt::Debug for WaitQueue<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("WaitQueue")
            .field("waiters", &inner.waiters.len())
            .field("state", &inner.state)
            .finish()
    }
}

/// Exclusive access to a [`WaitQueue`] and its state.
///
/// Wakers of settled waiters are invoked after the lock is released.
pub struct WaitQueueGuard<'a, S> {
    shared: &'a Shared<S>,
    inner: MutexGuard<'a, QueueState<S>>,
    wakers: Vec<Waker>,
}

impl<'a, S: WaitState> WaitQueueGuard<'a, S> {
    fn new(shared: &'a Shared<S>) -> Self {
        Self {
            shared,
            inner: shared.lock(),
            wakers: Vec::new(),
        }
    }

    /// Appends a waiter to the back of the queue.
    ///
    /// The waiter is cancelled when `cancel` fires and times out at
    /// `deadline`. A token that already fired yields a waiter settled as
    /// [`WaitOutcome::Cancelled`] without queueing it.
    pub fn enqueue(
        &mut self,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Waiter<S>, SyncError> {
        let id = self.inner.next_id;
        self.inner.next_id = self.inner.next_id.wrapping_add(1);
        let cell = Arc::new(WaiterCell::new(id));

        let weak = Arc::downgrade(self.shared);
        let registration = cancel.register_pending(move |kind| {
            if let Some(shared) = weak.upgrade() {
                let mut queue = WaitQueueGuard::new(&shared);
                if queue.remove(id, WaitOutcome::Cancelled) {
                    debug!(waiter = id, kind = %kind, "waiter cancelled");
                }
            }
        });
        let Some(registration) = registration else {
            // Not queued, so nothing else can settle it.
            let _ = cell.settle(WaitOutcome::Cancelled);
            return Ok(Waiter::new(cell, Arc::clone(self.shared), cancel, None, None));
        };

        let timer = match deadline {
            Some(deadline) => {
                let weak = Arc::downgrade(self.shared);
                Some(TimerService::global().schedule(
                    deadline,
                    Box::new(move || {
                        if let Some(shared) = weak.upgrade() {
                            let mut queue = WaitQueueGuard::new(&shared);
                            if queue.remove(id, WaitOutcome::TimedOut) {
                                debug!(waiter = id, "waiter timed out");
                            }
                        }
                    }),
                )?)
            }
            None => None,
        };

        self.inner.waiters.push_back(Arc::clone(&cell));
        trace!(waiter = id, queued = self.inner.waiters.len(), "waiter enqueued");
        Ok(Waiter::new(
            cell,
            Arc::clone(self.shared),
            cancel,
            Some(registration),
            timer,
        ))
    }

    /// Settles the oldest waiter with `outcome`.
    ///
    /// Returns false if the queue was empty.
    pub fn try_dequeue_one(&mut self, outcome: WaitOutcome) -> bool {
        let Some(cell) = self.inner.waiters.pop_front() else {
            return false;
        };
        trace!(waiter = cell.id, ?outcome, "waiter dequeued");
        self.settle(&cell, outcome);
        true
    }

    /// Settles every queued waiter with `outcome`, returning how many.
    pub fn dequeue_all(&mut self, outcome: WaitOutcome) -> usize {
        let drained: Vec<_> = self.inner.waiters.drain(..).collect();
        for cell in &drained {
            self.settle(cell, outcome);
        }
        if !drained.is_empty() {
            trace!(count = drained.len(), ?outcome, "waiters dequeued");
        }
        drained.len()
    }

    /// Removes `waiter` if it is still queued and settles it with `outcome`.
    ///
    /// Returns false if it was already settled.
    pub fn try_cancel(&mut self, waiter: &Waiter<S>, outcome: WaitOutcome) -> bool {
        self.remove(waiter.cell.id, outcome)
    }

    /// Returns the number of queued waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Returns true if no waiter is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.waiters.is_empty()
    }

    fn remove(&mut self, id: u64, outcome: WaitOutcome) -> bool {
        let Some(index) = self.inner.waiters.iter().position(|cell| cell.id == id) else {
            return false;
        };
        if let Some(cell) = self.inner.waiters.remove(index) {
            self.settle(&cell, outcome);
        }
        true
    }

    fn settle(&mut self, cell: &WaiterCell, outcome: WaitOutcome) {
        if let Some(waker) = cell.settle(outcome) {
            self.wakers.push(waker);
        }
    }
}

impl<S> Deref for WaitQueueGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner.state
    }
}

impl<S> DerefMut for WaitQueueGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner.state
    }
}

impl<S> Drop for WaitQueueGuard<'_, S> {
    fn drop(&mut self) {
        if self.wakers.is_empty() {
            return;
        }
        let wakers = std::mem::take(&mut self.wakers);
        MutexGuard::unlocked(&mut self.inner, || {
            for waker in wakers {
                waker.wake();
            }
        });
    }
}

/// Future resolving to the outcome of one queued wait.
///
/// Dropping it before completion cancels the wait.
#[must_use = "futures do nothing unless polled"]
pub struct Waiter<S: WaitState> {
    cell: Arc<WaiterCell>,
    shared: Shared<S>,
    cancel: CancelToken,
    registration: Option<CancelRegistration>,
    timer: Option<TimerHandle>,
    observed: bool,
}

impl<S: WaitState> Waiter<S> {
    fn new(
        cell: Arc<WaiterCell>,
        shared: Shared<S>,
        cancel: &CancelToken,
        registration: Option<CancelRegistration>,
        timer: Option<TimerHandle>,
    ) -> Self {
        Self {
            cell,
            shared,
            cancel: cancel.clone(),
            registration,
            timer,
            observed: false,
        }
    }

    /// Returns the outcome if the waiter has been settled.
    #[must_use]
    pub fn outcome(&self) -> Option<WaitOutcome> {
        self.cell.outcome()
    }

    fn disarm(&mut self) {
        self.registration = None;
        self.timer = None;
    }
}

impl<S: WaitState> Future for Waiter<S> {
    type Output = WaitOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        let outcome = {
            let mut slot = self.cell.slot.lock();
            match slot.outcome {
                Some(outcome) => outcome,
                None => {
                    match &slot.waker {
                        Some(waker) if waker.will_wake(cx.waker()) => {}
                        _ => slot.waker = Some(cx.waker().clone()),
                    }
                    return Poll::Pending;
                }
            }
        };

        self.observed = true;
        self.disarm();
        // A deadline and the caller's own token may both fire; the token wins.
        if outcome == WaitOutcome::TimedOut && self.cancel.is_cancel_requested() {
            return Poll::Ready(WaitOutcome::Cancelled);
        }
        Poll::Ready(outcome)
    }
}

impl<S: WaitState> Drop for Waiter<S> {
    fn drop(&mut self) {
        if self.observed {
            return;
        }
        self.disarm();
        let mut queue = WaitQueueGuard::new(&self.shared);
        if queue.remove(self.cell.id, WaitOutcome::Cancelled) {
            trace!(waiter = self.cell.id, "pending waiter dropped");
            return;
        }
        if self.cell.outcome() == Some(WaitOutcome::Granted) {
            debug!(waiter = self.cell.id, "grant abandoned by dropped waiter");
            S::regrant(&mut queue);
        }
    }
}

impl<S: WaitState> fmt::Debug for Waiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.cell.id)
            .field("outcome", &self.cell.outcome())
            .finish()
    }
}
