//! Error types and error handling strategy for dualsync.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Usage errors are reported synchronously, before any state mutation
//! - A timeout is not an error: timed operations return `Ok(false)`
//! - Cancellation is a distinct outcome, separate from both success and timeout
//! - Nothing is retried by the library; retry policy belongs to the caller
//!
//! # Error Categories
//!
//! Errors are organized by [`ErrorKind`]:
//!
//! - **Usage**: Unbalanced exit/release, wait or notify without holding the
//!   lock, recursion-depth overflow, flow-aware async operations polled
//!   outside a flow. These are programmer errors.
//! - **Cancellation**: The caller's token was signalled before the wait was
//!   granted.
//! - **Argument**: Timeouts outside the representable range, invalid
//!   construction parameters.
//! - **Resource**: The process could not provide a supporting resource (the
//!   timer thread).

use std::time::Duration;

use crate::cancel::CancelKind;

/// Classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The primitive was used in violation of its contract.
    Usage,
    /// The operation was cancelled before it was granted.
    Cancellation,
    /// An argument was rejected before any state was touched.
    Argument,
    /// A supporting resource could not be obtained.
    Resource,
}

/// Error returned by the primitives in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// `exit` was called by a flow that did not hold the lock.
    #[error("lock exited without a matching enter")]
    UnbalancedExit,

    /// A flow-aware async operation was polled with no flow installed.
    ///
    /// Wrap the future with [`FlowContext::scope`](crate::flow::FlowContext::scope)
    /// or [`flow::fork`](crate::flow::fork).
    #[error("reentrant async operation polled outside a flow scope")]
    NoFlow,

    /// A semaphore was released beyond its capacity.
    #[error("semaphore released beyond its capacity of {capacity}")]
    UnbalancedRelease {
        /// Maximum count of the semaphore.
        capacity: usize,
    },

    /// Wait or notify was called without holding the associated lock.
    #[error("object synchronization method called without holding the lock")]
    NotSynchronized,

    /// A reentrant lock was entered more times than the configured ceiling.
    #[error("recursion depth limit of {limit} exceeded")]
    RecursionLimit {
        /// The configured ceiling.
        limit: usize,
    },

    /// The wait was cancelled through the caller's token.
    #[error("operation cancelled ({kind})")]
    Cancelled {
        /// Why the token was cancelled.
        kind: CancelKind,
    },

    /// A timeout was outside the supported range.
    #[error("timeout {timeout:?} exceeds the supported maximum")]
    InvalidTimeout {
        /// The rejected timeout.
        timeout: Duration,
    },

    /// A constructor argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The timer thread backing timeouts could not be started.
    #[error("timer service unavailable: {0}")]
    TimerUnavailable(String),
}

impl SyncError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnbalancedExit
            | Self::UnbalancedRelease { .. }
            | Self::NotSynchronized
            | Self::NoFlow
            | Self::RecursionLimit { .. } => ErrorKind::Usage,
            Self::Cancelled { .. } => ErrorKind::Cancellation,
            Self::InvalidTimeout { .. } | Self::InvalidArgument(_) => ErrorKind::Argument,
            Self::TimerUnavailable(_) => ErrorKind::Resource,
        }
    }

    /// Returns true if this error reports a cancelled wait.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if this error reports a contract violation by the caller.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Usage)
    }

    /// Shorthand for a user-initiated cancellation.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::Cancelled {
            kind: CancelKind::User,
        }
    }
}

/// A specialized Result type for dualsync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
