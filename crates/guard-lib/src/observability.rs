//! Observability infrastructure for the restart guard
//!
//! Provides:
//! - Prometheus metrics (reconcile outcomes and latency, queue depth, monitors, remediations)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile durations (in seconds)
///
/// Short-circuited reconciles finish in milliseconds; monitored ones run
/// for as long as the session lasts.
const RECONCILE_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 60.0, 600.0, 3600.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct ControllerMetricsInner {
    reconciles: IntCounterVec,
    reconcile_duration_seconds: Histogram,
    queue_depth: IntGauge,
    requeues: IntCounter,
    dropped: IntCounter,
    active_monitors: IntGauge,
    remediations: IntCounter,
    remediation_errors: IntCounter,
    pod_events: IntCounterVec,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            reconciles: register_int_counter_vec!(
                "restart_guard_reconciles_total",
                "Reconciliations by outcome",
                &["outcome"]
            )
            .expect("Failed to register reconciles_total"),

            reconcile_duration_seconds: register_histogram!(
                "restart_guard_reconcile_duration_seconds",
                "Time spent in a single reconciliation, monitoring included",
                RECONCILE_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            queue_depth: register_int_gauge!(
                "restart_guard_queue_depth",
                "Pod keys waiting in the work queue"
            )
            .expect("Failed to register queue_depth"),

            requeues: register_int_counter!(
                "restart_guard_requeues_total",
                "Rate-limited requeues after a retryable failure"
            )
            .expect("Failed to register requeues_total"),

            dropped: register_int_counter!(
                "restart_guard_dropped_total",
                "Pod keys dropped after a terminal failure or exhausted retries"
            )
            .expect("Failed to register dropped_total"),

            active_monitors: register_int_gauge!(
                "restart_guard_active_monitors",
                "Restart monitoring sessions currently running"
            )
            .expect("Failed to register active_monitors"),

            remediations: register_int_counter!(
                "restart_guard_remediations_total",
                "Deployments scaled to zero"
            )
            .expect("Failed to register remediations_total"),

            remediation_errors: register_int_counter!(
                "restart_guard_remediation_errors_total",
                "Failed attempts to scale a deployment to zero"
            )
            .expect("Failed to register remediation_errors_total"),

            pod_events: register_int_counter_vec!(
                "restart_guard_pod_events_total",
                "Pod notifications received from the watch, by kind",
                &["kind"]
            )
            .expect("Failed to register pod_events_total"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    /// Count a finished reconciliation
    pub fn inc_reconcile(&self, outcome: &str) {
        self.inner().reconciles.with_label_values(&[outcome]).inc();
    }

    pub fn observe_reconcile_duration(&self, duration_secs: f64) {
        self.inner().reconcile_duration_seconds.observe(duration_secs);
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }

    pub fn inc_requeues(&self) {
        self.inner().requeues.inc();
    }

    pub fn inc_dropped(&self) {
        self.inner().dropped.inc();
    }

    pub fn set_active_monitors(&self, count: i64) {
        self.inner().active_monitors.set(count);
    }

    pub fn inc_remediations(&self) {
        self.inner().remediations.inc();
    }

    pub fn inc_remediation_errors(&self) {
        self.inner().remediation_errors.inc();
    }

    /// Count a pod notification (`add`, `update`, `unchanged`)
    pub fn inc_pod_event(&self, kind: &str) {
        self.inner().pod_events.with_label_values(&[kind]).inc();
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted records for remediations, give-ups
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, workers: usize) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            workers = workers,
            "Restart guard started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Restart guard shutting down"
        );
    }

    /// Log the start of a restart monitoring session
    pub fn log_monitor_started(
        &self,
        namespace: &str,
        pod_name: &str,
        deployment: &str,
        baseline_restarts: i32,
    ) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            deployment = %deployment,
            baseline_restarts = baseline_restarts,
            "Monitoring pod restarts"
        );
    }

    /// Log a sample that crossed the restart threshold
    pub fn log_threshold_crossed(
        &self,
        namespace: &str,
        pod_name: &str,
        baseline_restarts: i32,
        sampled_restarts: i32,
        threshold: u32,
    ) {
        warn!(
            event = "restart_threshold_crossed",
            instance = %self.instance,
            namespace = %namespace,
            pod_name = %pod_name,
            baseline_restarts = baseline_restarts,
            sampled_restarts = sampled_restarts,
            threshold = threshold,
            "Pod restarted too often"
        );
    }

    /// Log a completed remediation
    pub fn log_deployment_scaled(
        &self,
        namespace: &str,
        deployment: &str,
        previous_replicas: Option<i32>,
        replicas: Option<i32>,
    ) {
        warn!(
            event = "deployment_scaled",
            instance = %self.instance,
            namespace = %namespace,
            deployment = %deployment,
            previous_replicas = ?previous_replicas,
            replicas = ?replicas,
            "Deployment scaled down after restart storm"
        );
    }

    /// Log a pod key dropped from the queue
    pub fn log_dropped(&self, key: &str, reason: &str, retries: u32, error: &str) {
        warn!(
            event = "reconcile_dropped",
            instance = %self.instance,
            key = %key,
            reason = %reason,
            retries = retries,
            error = %error,
            "Dropping pod from the work queue"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_metrics_creation() {
        let metrics = ControllerMetrics::new();

        metrics.inc_reconcile("success");
        metrics.observe_reconcile_duration(0.002);
        metrics.set_queue_depth(3);
        metrics.inc_requeues();
        metrics.inc_dropped();
        metrics.set_active_monitors(1);
        metrics.inc_remediations();
        metrics.inc_remediation_errors();
        metrics.inc_pod_event("add");

        // Handles share the global instance
        let other = ControllerMetrics::new();
        other.inc_reconcile("success");
        assert!(GLOBAL_METRICS.get().is_some());
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("restart-guard-0");
        assert_eq!(logger.instance, "restart-guard-0");
    }
}
