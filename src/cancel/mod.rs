//! Cancellation tokens.
//!
//! Cancellation is a protocol, not a silent drop: a [`CancelSource`]
//! signals, every [`CancelToken`] handed out by it observes the signal, and
//! callbacks registered on a token run exactly once when it fires. The
//! primitives in [`crate::sync`] register such a callback for every pending
//! wait, so a signalled token completes the wait with
//! [`SyncError::Cancelled`](crate::SyncError::Cancelled).

mod token;

pub use token::{CancelKind, CancelRegistration, CancelSource, CancelToken};
