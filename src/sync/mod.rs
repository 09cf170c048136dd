//! Dual-mode synchronization primitives.
//!
//! Every primitive here can be used from a blocking thread and from an async
//! task at the same time. Each one is a single state machine behind a
//! [`WaitQueue`]; the async methods drive it directly and the blocking
//! methods run the same future through [`runtime::block_on`](crate::runtime::block_on).
//!
//! # Primitives
//!
//! - [`SemaphoreCore`]: Counting semaphore with direct handoff
//! - [`MutexCore`]: Binary lock, not reentrant
//! - [`ReentrantLock`]: Lock a logical flow may enter repeatedly
//! - [`Condition`]: Wait/notify over any [`Lockable`]
//! - [`Monitor`]: Reentrant lock and condition as one object
//! - [`ManualResetEvent`] / [`AutoResetEvent`]: Signal primitives
//!
//! # Flows
//!
//! Reentrant primitives ([`ReentrantLock`], [`Monitor`], and [`Condition`]
//! waits) record depth per logical flow. Blocking calls use the calling
//! thread's flow. Async calls must be polled inside a flow installed by
//! [`FlowContext::scope`](crate::flow::FlowContext::scope) or
//! [`flow::fork`](crate::flow::fork), and fail with
//! [`SyncError::NoFlow`](crate::SyncError::NoFlow) otherwise. Two tasks
//! sharing an executor thread are therefore never mistaken for one holder.
//!
//! # Fairness
//!
//! Waiters are served strictly in the order they queued. A newcomer only
//! skips the queue when the resource is free and nobody is waiting.
//!
//! # Cancel Safety
//!
//! - Cancellation while waiting: the waiter leaves the queue, no permit taken
//! - Cancellation racing a grant: exactly one of the two is observed
//! - Dropping a pending future: same as cancelling it; an abandoned grant
//!   goes to the next waiter

mod condvar;
mod event;
mod lockable;
mod monitor;
mod mutex;
mod recursion;
mod reentrant;
mod semaphore;
mod wait_queue;

pub use condvar::Condition;
pub use event::{AutoResetEvent, ManualResetEvent};
pub use lockable::{BoxFuture, LockGuard, Lockable, Suspended};
pub use monitor::{Monitor, MonitorRegistry};
pub use mutex::MutexCore;
pub use recursion::{ForkedEntry, RecursionTracker};
pub use reentrant::ReentrantLock;
pub use semaphore::SemaphoreCore;
pub use wait_queue::{WaitOutcome, WaitQueue, WaitQueueGuard, WaitState, Waiter};
