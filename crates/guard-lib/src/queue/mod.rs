//! Reconciliation work queue
//!
//! This module provides:
//! - A deduplicating multi-consumer queue with per-key in-flight tracking
//! - Per-item exponential backoff for rate-limited requeues

mod rate_limiter;
mod work_queue;

pub use rate_limiter::ExponentialBackoff;
pub use work_queue::WorkQueue;
