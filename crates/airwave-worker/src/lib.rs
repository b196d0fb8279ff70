//! Airwave Worker Library
//!
//! Leases jobs from the durable queue, runs them through a handler context
//! with per-kind timeouts, and reports the result back with the lease token.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, JobContext, JobHandlerContext};
pub use queue::{compute_retry_backoff_seconds, Dispatcher, JobQueue, JobQueueConfig, JobRunOutcome};
