//! Deadlines and the timer service behind every timed wait.
//!
//! Timeouts are not a separate code path in the primitives: a timed wait
//! arms a timer whose callback cancels the pending waiter exactly like a
//! cancellation token would, only with a "timed out" outcome.
//!
//! - [`deadline_after`]: validates a timeout and turns it into an [`Instant`]
//! - [`TimerService`]: process-wide timer thread running callbacks at deadlines
//! - [`TimerHandle`]: disarms its timer when dropped

mod service;

use std::time::{Duration, Instant};

use crate::error::SyncError;

pub use service::{TimerCallback, TimerHandle, TimerService};

/// Largest timeout accepted by timed operations (`i32::MAX` milliseconds).
pub const MAX_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Converts a relative timeout into an absolute deadline.
///
/// Fails with [`SyncError::InvalidTimeout`] when the timeout exceeds
/// [`MAX_TIMEOUT`] or cannot be represented as an [`Instant`].
pub fn deadline_after(timeout: Duration) -> Result<Instant, SyncError> {
    if timeout > MAX_TIMEOUT {
        return Err(SyncError::InvalidTimeout { timeout });
    }
    Instant::now()
        .checked_add(timeout)
        .ok_or(SyncError::InvalidTimeout { timeout })
}

/// Validates an optional timeout, mapping `None` to "no deadline".
pub(crate) fn optional_deadline(timeout: Option<Duration>) -> Result<Option<Instant>, SyncError> {
    timeout.map(deadline_after).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_after_accepts_range() {
        let before = Instant::now();
        let deadline = deadline_after(Duration::from_millis(5)).expect("valid timeout");
        assert!(deadline >= before + Duration::from_millis(5));
        assert!(deadline_after(Duration::ZERO).is_ok());
        assert!(deadline_after(MAX_TIMEOUT).is_ok());
    }

    #[test]
    fn deadline_after_rejects_oversized() {
        let too_long = MAX_TIMEOUT + Duration::from_millis(1);
        assert_eq!(
            deadline_after(too_long),
            Err(SyncError::InvalidTimeout { timeout: too_long })
        );
        assert!(deadline_after(Duration::MAX).is_err());
    }

    #[test]
    fn optional_deadline_passes_none_through() {
        assert_eq!(optional_deadline(None), Ok(None));
        assert!(optional_deadline(Some(Duration::from_secs(1)))
            .expect("valid")
            .is_some());
    }
}
