//! Property tests comparing the primitives against simple models.

#![allow(missing_docs)]

#[macro_use]
mod common;

use common::*;
use dualsync::cancel::{CancelSource, CancelToken};
use dualsync::flow::FlowContext;
use dualsync::sync::{AutoResetEvent, ManualResetEvent, MutexCore, ReentrantLock, SemaphoreCore};
use dualsync::SyncError;
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum LockOp {
    Enter,
    Exit,
}

fn lock_op() -> impl Strategy<Value = LockOp> {
    prop_oneof![Just(LockOp::Enter), Just(LockOp::Exit)]
}

#[derive(Debug, Clone, Copy)]
enum SemOp {
    TryAcquire,
    Release,
}

fn sem_op() -> impl Strategy<Value = SemOp> {
    prop_oneof![Just(SemOp::TryAcquire), Just(SemOp::Release)]
}

#[derive(Debug, Clone, Copy)]
enum EventOp {
    Set,
    Reset,
    Probe,
}

fn event_op() -> impl Strategy<Value = EventOp> {
    prop_oneof![Just(EventOp::Set), Just(EventOp::Reset), Just(EventOp::Probe)]
}

proptest! {
    #![proptest_config(test_proptest_config(64))]

    /// Depth follows enter/exit exactly and the lock is held iff depth > 0.
    #[test]
    fn reentrant_depth_matches_model(ops in proptest::collection::vec(lock_op(), 0..40)) {
        init_test_logging();
        let lock = ReentrantLock::with_limit(64);
        let none = CancelToken::none();
        FlowContext::new().run(|| {
            let mut depth = 0usize;
            for op in &ops {
                match op {
                    LockOp::Enter => {
                        lock.enter(&none).expect("enter");
                        depth += 1;
                    }
                    LockOp::Exit => {
                        let result = lock.exit();
                        if depth == 0 {
                            assert_eq!(result, Err(SyncError::UnbalancedExit));
                        } else {
                            assert!(result.is_ok());
                            depth -= 1;
                        }
                    }
                }
                assert_eq!(lock.depth(), depth);
                assert_eq!(lock.is_held(), depth > 0);
            }
        });
    }

    /// Permit count never exceeds capacity and never goes negative.
    #[test]
    fn semaphore_count_matches_model(
        capacity in 1usize..6,
        ops in proptest::collection::vec(sem_op(), 0..40),
    ) {
        init_test_logging();
        let sem = SemaphoreCore::new(capacity, capacity).expect("new");
        let mut available = capacity;
        for op in &ops {
            match op {
                SemOp::TryAcquire => {
                    let got = sem.try_acquire();
                    prop_assert_eq!(got, available > 0);
                    if got {
                        available -= 1;
                    }
                }
                SemOp::Release => {
                    let result = sem.release();
                    if available == capacity {
                        prop_assert_eq!(result, Err(SyncError::UnbalancedRelease { capacity }));
                    } else {
                        prop_assert!(result.is_ok());
                        available += 1;
                    }
                }
            }
            prop_assert_eq!(sem.current_count(), available);
        }
    }

    /// Queued waiters are granted in queue order, skipping cancelled ones.
    #[test]
    fn mutex_grants_fifo_after_cancellations(
        cancelled in proptest::collection::vec(any::<bool>(), 1..8),
    ) {
        init_test_logging();
        let mutex = MutexCore::new();
        let none = CancelToken::none();
        mutex.enter(&none).expect("enter");

        let sources: Vec<CancelSource> = cancelled.iter().map(|_| CancelSource::new()).collect();
        let tokens: Vec<CancelToken> = sources.iter().map(CancelSource::token).collect();
        let mut waits: Vec<_> = tokens
            .iter()
            .map(|token| Box::pin(mutex.enter_async(token)))
            .collect();
        for wait in &mut waits {
            prop_assert!(poll_once(wait).is_none());
        }
        for (source, cancel) in sources.iter().zip(&cancelled) {
            if *cancel {
                source.cancel();
            }
        }

        let survivors: Vec<usize> = (0..cancelled.len()).filter(|i| !cancelled[*i]).collect();
        prop_assert_eq!(mutex.waiter_count(), survivors.len());

        for (index, cancel) in cancelled.iter().enumerate() {
            if *cancel {
                let result = poll_once(&mut waits[index]).expect("settled");
                prop_assert!(result.unwrap_err().is_cancelled());
            }
        }

        for &expected in &survivors {
            mutex.exit().expect("exit");
            for &other in survivors.iter().filter(|&&i| i >= expected) {
                let ready = poll_once(&mut waits[other]);
                if other == expected {
                    prop_assert!(matches!(ready, Some(Ok(()))));
                } else {
                    prop_assert!(ready.is_none());
                }
            }
        }
        mutex.exit().expect("exit");
        prop_assert!(!mutex.is_held());
    }

    /// Auto-reset events release one probe per set; manual ones stay set.
    #[test]
    fn events_match_model(ops in proptest::collection::vec(event_op(), 0..40)) {
        init_test_logging();
        let auto = AutoResetEvent::new(false);
        let manual = ManualResetEvent::new(false);
        let none = CancelToken::none();
        let mut auto_set = false;
        let mut manual_set = false;
        for op in &ops {
            match op {
                EventOp::Set => {
                    auto.set();
                    manual.set();
                    auto_set = true;
                    manual_set = true;
                }
                EventOp::Reset => {
                    auto.reset();
                    manual.reset();
                    auto_set = false;
                    manual_set = false;
                }
                EventOp::Probe => {
                    let got = auto.wait_for(Duration::ZERO, &none).expect("probe");
                    prop_assert_eq!(got, auto_set);
                    auto_set = false;
                    let got = manual.wait_for(Duration::ZERO, &none).expect("probe");
                    prop_assert_eq!(got, manual_set);
                }
            }
            prop_assert_eq!(auto.is_set(), auto_set);
            prop_assert_eq!(manual.is_set(), manual_set);
        }
    }
}
