//! Timer thread with a min-heap of deadlines.
//!
//! Entries are ordered by deadline, ties broken by insertion generation.
//! Cancellation removes the callback and leaves the heap entry to be skipped
//! when it reaches the top.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::tracing_compat::{error, trace};

/// Work run on the timer thread when a deadline passes.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

static GLOBAL: OnceLock<TimerService> = OnceLock::new();

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Instant,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    callbacks: HashMap<u64, TimerCallback>,
    next_generation: u64,
    worker_started: bool,
    shutdown: bool,
}

impl TimerState {
    /// Drops heap entries whose callbacks were cancelled, once they dominate.
    fn compact(&mut self) {
        if self.heap.len() > 64 && self.heap.len() > 2 * self.callbacks.len() {
            let callbacks = &self.callbacks;
            self.heap.retain(|entry| callbacks.contains_key(&entry.generation));
        }
    }

    /// Pops every expired live entry.
    fn pop_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek().copied() {
            if !self.callbacks.contains_key(&entry.generation) {
                self.heap.pop();
                continue;
            }
            if entry.deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(callback) = self.callbacks.remove(&entry.generation) {
                expired.push(callback);
            }
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }
}

struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
    thread_name: String,
}

impl TimerShared {
    fn run(self: Arc<Self>) {
        trace!(thread = %self.thread_name, "timer thread started");
        loop {
            let expired = {
                let mut state = self.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    let expired = state.pop_expired(Instant::now());
                    if !expired.is_empty() {
                        break expired;
                    }
                    match state.next_deadline() {
                        Some(deadline) => {
                            self.wakeup.wait_until(&mut state, deadline);
                        }
                        None => self.wakeup.wait(&mut state),
                    }
                }
            };

            trace!(count = expired.len(), "timers fired");
            for callback in expired {
                callback();
            }
        }
    }
}

/// Runs callbacks at deadlines on a dedicated thread.
///
/// The thread is spawned on the first [`schedule`](Self::schedule) call.
/// Most code uses [`TimerService::global`].
pub struct TimerService {
    shared: Arc<TimerShared>,
}

impl TimerService {
    /// Creates a service whose thread will carry the given name.
    #[must_use]
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    heap: BinaryHeap::new(),
                    callbacks: HashMap::new(),
                    next_generation: 0,
                    worker_started: false,
                    shutdown: false,
                }),
                wakeup: Condvar::new(),
                thread_name: thread_name.into(),
            }),
        }
    }

    /// Returns the process-wide timer service.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(SyncConfig::global().timer_thread_name.clone()))
    }

    /// Schedules `callback` to run at `deadline`.
    ///
    /// A deadline already in the past fires on the next timer tick.
    pub fn schedule(
        &self,
        deadline: Instant,
        callback: TimerCallback,
    ) -> Result<TimerHandle, SyncError> {
        let mut state = self.shared.state.lock();
        if !state.worker_started {
            let shared = Arc::clone(&self.shared);
            thread::Builder::new()
                .name(self.shared.thread_name.clone())
                .spawn(move || shared.run())
                .map_err(|err| {
                    error!(error = %err, "failed to spawn timer thread");
                    SyncError::TimerUnavailable(err.to_string())
                })?;
            state.worker_started = true;
        }

        let generation = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);
        state.callbacks.insert(generation, callback);
        state.heap.push(TimerEntry {
            deadline,
            generation,
        });
        state.compact();
        drop(state);
        self.shared.wakeup.notify_one();

        Ok(TimerHandle {
            shared: Arc::downgrade(&self.shared),
            generation: Some(generation),
        })
    }

    /// Returns the number of armed timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().callbacks.len()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_all();
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("thread_name", &self.shared.thread_name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Handle to an armed timer. Disarms the timer on drop.
#[must_use = "dropping the handle disarms the timer"]
pub struct TimerHandle {
    shared: Weak<TimerShared>,
    generation: Option<u64>,
}

impl TimerHandle {
    /// Disarms the timer.
    ///
    /// Returns false if the timer already fired.
    pub fn cancel(mut self) -> bool {
        self.disarm()
    }

    fn disarm(&mut self) -> bool {
        let Some(generation) = self.generation.take() else {
            return false;
        };
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let removed = shared.state.lock().callbacks.remove(&generation);
        removed.is_some()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.disarm();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("generation", &self.generation)
            .finish()
    }
}
