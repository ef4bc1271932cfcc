//! Reconciliation engine
//!
//! This module provides:
//! - The per-pod decision function that filters irrelevant pods
//! - Restart monitoring sessions that sample restart counters over time
//! - Remediation by scaling the owning deployment to zero
//! - The worker pool that drains the work queue with bounded retries

mod dispatch;
mod monitor;
mod reconciler;
mod remediation;


pub use dispatch::Controller;
pub use monitor::{MonitorRegistry, MonitorSession, RestartMonitor};
pub use reconciler::{Decision, MonitorTarget, ReconcileOutcome, Reconciler, SkipReason};
pub use remediation::Remediator;

use crate::error::ConfigError;
use crate::queue::ExponentialBackoff;
use std::time::Duration;

/// Annotation whose presence opts a pod into restart monitoring
pub const DEFAULT_ANNOTATION_KEY: &str = "watch-podrestart";

/// Node condition consulted before monitoring
pub const DEFAULT_NODE_READY_CONDITION: &str = "Ready";

/// Tunables for the reconciliation engine
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Parallel queue workers (default: 2)
    pub workers: usize,
    /// Rate-limited requeues before a failing key is dropped (default: 2)
    pub max_retries: u32,
    /// Interval between restart samples (default: 1 minute)
    pub monitor_period: Duration,
    /// Delay between capturing the baseline and the sampling schedule (default: 5 seconds)
    pub settle_delay: Duration,
    /// Restarts over the baseline that trigger remediation (default: 1)
    pub restart_threshold: u32,
    /// Pod annotation that opts a pod into guarding (default: `watch-podrestart`)
    pub annotation_key: String,
    /// Node condition that must be `True` before a pod is monitored (default: `Ready`)
    pub node_ready_condition: String,
    /// First requeue delay, doubled per failure
    pub retry_base_delay: Duration,
    /// Upper bound for the requeue delay
    pub retry_max_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let backoff = ExponentialBackoff::default();
        Self {
            workers: 2,
            max_retries: 2,
            monitor_period: Duration::from_secs(60),
            settle_delay: Duration::from_secs(5),
            restart_threshold: 1,
            annotation_key: DEFAULT_ANNOTATION_KEY.to_string(),
            node_ready_condition: DEFAULT_NODE_READY_CONDITION.to_string(),
            retry_base_delay: backoff.base,
            retry_max_delay: backoff.max,
        }
    }
}

impl ControllerConfig {
    /// Requeue backoff built from the retry delays
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.retry_base_delay, self.retry_max_delay)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.monitor_period.is_zero() {
            return Err(ConfigError::Invalid("monitor period must be non-zero".into()));
        }
        if self.restart_threshold == 0 {
            return Err(ConfigError::Invalid(
                "restart threshold must be at least 1".into(),
            ));
        }
        if self.annotation_key.is_empty() {
            return Err(ConfigError::Invalid("annotation key must be set".into()));
        }
        if self.node_ready_condition.is_empty() {
            return Err(ConfigError::Invalid(
                "node ready condition must be set".into(),
            ));
        }
        Ok(())
    }
}
