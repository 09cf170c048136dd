//! Drives a future to completion on the current thread.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

use crate::flow::FlowContext;

/// Unparks the blocked thread when woken.
struct ThreadWaker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.notified.swap(true, Ordering::Release) {
            self.thread.unpark();
        }
    }
}

/// Runs `future` to completion, parking the current thread while it is
/// pending.
///
/// The future is polled inline: wake-ups only unpark this thread, they never
/// schedule work elsewhere. Every poll runs in the caller's flow, which is
/// the root flow of this thread unless one is already installed.
///
/// # Example
///
/// ```
/// use dualsync::runtime::block_on;
///
/// assert_eq!(block_on(async { 40 + 2 }), 42);
/// ```
pub fn block_on<F: Future>(future: F) -> F::Output {
    let waker_state = Arc::new(ThreadWaker {
        thread: thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&waker_state));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    let _flow = FlowContext::current().enter();

    loop {
        if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
            return output;
        }
        // Spurious unparks are possible; only a real wake ends the park.
        while !waker_state.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }
}
