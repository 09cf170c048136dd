//! Dualsync: synchronization primitives for threads and tasks at once.
//!
//! # Overview
//!
//! Each primitive in this crate exposes a blocking API and an async API over
//! one shared state machine. A thread blocked in [`sync::ReentrantLock::enter`]
//! and a task suspended in [`sync::ReentrantLock::enter_async`] queue on the
//! same FIFO wait queue and are served in the order they arrived.
//!
//! # Core Guarantees
//!
//! - **FIFO fairness**: Queued waiters are granted in arrival order; no barging
//! - **Cancel-correctness**: A cancelled or dropped wait leaves no permit and no recursion depth behind
//! - **Flow-aware reentrancy**: Reentrancy follows the logical flow, not the OS thread
//! - **No lost wakeups**: Condition waits enqueue before they release the lock
//! - **Inline bridging**: Blocking calls poll their future on the calling thread
//!
//! # Module Structure
//!
//! - [`sync`]: The primitives and their wait queue
//! - [`flow`]: Logical flows carrying recursion depth across suspension points
//! - [`cancel`]: Cancellation sources, tokens and registrations
//! - [`time`]: Timeout validation and the timer service
//! - [`runtime`]: The blocking bridge
//! - [`config`]: Process-wide tunables with environment overrides
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use dualsync::cancel::CancelToken;
//! use dualsync::sync::Monitor;
//!
//! let monitor = Monitor::new();
//! let none = CancelToken::none();
//! monitor.enter(&none)?;
//! monitor.enter(&none)?;
//! assert!(!monitor.wait_for(std::time::Duration::from_millis(1), &none)?);
//! assert_eq!(monitor.depth(), 2);
//! monitor.exit()?;
//! monitor.exit()?;
//! # Ok::<(), dualsync::SyncError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod flow;
pub mod runtime;
pub mod sync;
pub mod time;
pub mod tracing_compat;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_utils;

pub use cancel::{CancelKind, CancelSource, CancelToken};
pub use config::{ConfigError, SyncConfig};
pub use error::{ErrorKind, Result, SyncError};
pub use flow::FlowContext;
pub use sync::{
    AutoResetEvent, Condition, Lockable, ManualResetEvent, Monitor, MutexCore, ReentrantLock,
    SemaphoreCore,
};
