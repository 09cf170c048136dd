//! Per-flow recursion depth for reentrant locks.
//!
//! Depth lives in the caller's [`FlowContext`], keyed by a slot unique to the
//! tracker, so it follows a task across threads instead of sticking to the
//! thread that happened to poll it. Every read goes through the flow's lock;
//! no depth value is cached across a suspension point.
//!
//! Async first entry uses [`RecursionTracker::fork_enter`]: the increment is
//! prepared against the caller's flow but only applied by
//! [`ForkedEntry::commit`] once the underlying lock is really held. Dropping
//! the [`ForkedEntry`] discards it.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::flow::{self, FlowContext};

/// Tracks how deep the current flow has entered one lock.
#[derive(Debug)]
pub struct RecursionTracker {
    slot: u64,
    limit: usize,
}

impl RecursionTracker {
    /// Creates a tracker limited by [`SyncConfig::max_recursion_depth`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(SyncConfig::global().max_recursion_depth)
    }

    /// Creates a tracker with an explicit depth ceiling (at least 1).
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slot: flow::next_slot(),
            limit: limit.max(1),
        }
    }

    /// Returns the depth ceiling.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the current flow's depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth_in(&FlowContext::current())
    }

    pub(crate) fn depth_in(&self, flow: &FlowContext) -> usize {
        flow.get(self.slot)
    }

    /// Returns true if the current flow has entered.
    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.depth() > 0
    }

    /// Increments the current flow's depth.
    ///
    /// Returns true on the first entry, when the caller must acquire the
    /// underlying resource.
    pub fn enter(&self) -> Result<bool> {
        self.enter_in(&FlowContext::current())
    }

    pub(crate) fn enter_in(&self, flow: &FlowContext) -> Result<bool> {
        let limit = self.limit;
        flow.update(self.slot, |depth| {
            if *depth >= limit {
                return Err(SyncError::RecursionLimit { limit });
            }
            *depth += 1;
            Ok(*depth == 1)
        })
    }

    /// Decrements the current flow's depth.
    ///
    /// Returns true when the depth reaches zero, when the caller must release
    /// the underlying resource.
    pub fn exit(&self) -> Result<bool> {
        FlowContext::current().update(self.slot, |depth| {
            if *depth == 0 {
                return Err(SyncError::UnbalancedExit);
            }
            *depth -= 1;
            Ok(*depth == 0)
        })
    }

    /// Prepares a first entry without applying it.
    pub fn fork_enter(&self) -> Result<ForkedEntry> {
        self.fork_enter_in(FlowContext::current())
    }

    pub(crate) fn fork_enter_in(&self, flow: FlowContext) -> Result<ForkedEntry> {
        if flow.get(self.slot) >= self.limit {
            return Err(SyncError::RecursionLimit { limit: self.limit });
        }
        Ok(ForkedEntry {
            flow,
            slot: self.slot,
            add: 1,
        })
    }

    /// Clears `flow`'s depth, returning what it was.
    pub(crate) fn suspend_in(&self, flow: &FlowContext) -> usize {
        flow.update(self.slot, std::mem::take)
    }

    /// Prepares restoring `depth` in `flow` once the lock is reacquired.
    pub(crate) fn fork_restore(&self, flow: FlowContext, depth: usize) -> ForkedEntry {
        ForkedEntry {
            flow,
            slot: self.slot,
            add: depth,
        }
    }
}

impl Default for RecursionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A depth change prepared against a flow but not yet applied.
#[derive(Debug)]
#[must_use = "a forked entry does nothing unless committed"]
pub struct ForkedEntry {
    flow: FlowContext,
    slot: u64,
    add: usize,
}

impl ForkedEntry {
    /// Applies the change to the flow that prepared it.
    pub fn commit(self) {
        let add = self.add;
        self.flow
            .update(self.slot, |depth| *depth = depth.saturating_add(add));
    }

    /// Returns the flow the change will be applied to.
    pub fn flow(&self) -> &FlowContext {
        &self.flow
    }
}
