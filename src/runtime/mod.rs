//! Bridging between blocking callers and the async state machines.
//!
//! Every primitive is written once, as a future. Blocking entry points call
//! [`block_on`], which polls that future on the calling thread and parks the
//! thread between polls. Nothing is posted to another executor, so a blocking
//! call made from a saturated thread pool cannot deadlock waiting for a pool
//! thread to run its continuation.

mod block_on;

pub use block_on::block_on;
