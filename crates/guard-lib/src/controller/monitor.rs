//! Restart monitoring sessions
//!
//! A session captures the pod's first-container restart count, waits a
//! settle delay, then samples the counter from the local cache every
//! monitor period. Whenever the count has grown by at least the threshold
//! since the baseline, the owning deployment is scaled to zero and the
//! baseline moves to that sample. The session keeps sampling until
//! shutdown, the pod leaving the cache, or a remediation error.
//!
//! When remediation fails with a retryable error the pre-crossing baseline
//! is carried in the [`MonitorRegistry`], so the requeued reconcile resumes
//! from it and still acts on the crossing that was never remediated.

use super::{ControllerConfig, MonitorTarget, Remediator};
use crate::cluster::PodLister;
use crate::error::ReconcileError;
use crate::models::{PodKey, RestartBaseline};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::shutdown::{self, ShutdownSignal};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// State of one running session, as reported on the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSession {
    pub namespace: String,
    pub pod: String,
    pub deployment: String,
    pub baseline: RestartBaseline,
    pub last_sample: Option<i32>,
    pub remediations: u32,
}

/// Registry of running sessions, keyed by pod
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    sessions: Arc<DashMap<PodKey, MonitorSession>>,
    /// Baselines of crossings whose remediation is awaiting a retry
    carried: Arc<DashMap<PodKey, RestartBaseline>>,
}

impl MonitorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of running sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no session is running
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the session monitoring `key`, if one is running
    pub fn get(&self, key: &PodKey) -> Option<MonitorSession> {
        self.sessions.get(key).map(|s| s.value().clone())
    }

    /// Baseline kept for `key` after a retryable remediation failure
    pub fn carried(&self, key: &PodKey) -> Option<RestartBaseline> {
        self.carried.get(key).map(|b| b.value().clone())
    }

    /// Forget a carried baseline once the key is skipped or dropped
    pub fn discard_carried(&self, key: &PodKey) {
        if self.carried.remove(key).is_some() {
            debug!(key = %key, "Discarded carried restart baseline");
        }
    }

    fn carry(&self, key: &PodKey, baseline: RestartBaseline) {
        self.carried.insert(key.clone(), baseline);
    }

    /// Take the carried baseline for a new session
    ///
    /// A carried count above the pod's current count belongs to an earlier
    /// container history and is ignored.
    fn resume(&self, key: &PodKey, current_restarts: i32) -> Option<RestartBaseline> {
        self.carried
            .remove(key)
            .map(|(_, baseline)| baseline)
            .filter(|baseline| baseline.restart_count <= current_restarts)
    }

    /// Sessions sorted by pod key
    pub fn sessions(&self) -> Vec<MonitorSession> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by(|a, b| (&a.namespace, &a.pod).cmp(&(&b.namespace, &b.pod)));
        sessions
    }

    fn update(&self, key: &PodKey, f: impl FnOnce(&mut MonitorSession)) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            f(session.value_mut());
        }
    }
}

/// Removes the session from the registry when the session ends
struct SessionGuard {
    key: PodKey,
    registry: MonitorRegistry,
    metrics: ControllerMetrics,
}

impl SessionGuard {
    fn start(
        key: PodKey,
        session: MonitorSession,
        registry: MonitorRegistry,
        metrics: ControllerMetrics,
    ) -> Self {
        registry.sessions.insert(key.clone(), session);
        metrics.set_active_monitors(registry.len() as i64);
        Self {
            key,
            registry,
            metrics,
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.key);
        self.metrics.set_active_monitors(self.registry.len() as i64);
    }
}

/// Samples a pod's restart counter and remediates on a threshold crossing
///
/// Each session registers itself in the [`MonitorRegistry`] for as long as
/// it runs.
pub struct RestartMonitor {
    pods: Arc<dyn PodLister>,
    remediator: Remediator,
    registry: MonitorRegistry,
    config: Arc<ControllerConfig>,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl RestartMonitor {
    /// Monitor reading pods through `pods` and recording sessions in `registry`
    pub fn new(
        pods: Arc<dyn PodLister>,
        remediator: Remediator,
        registry: MonitorRegistry,
        config: Arc<ControllerConfig>,
        logger: StructuredLogger,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            pods,
            remediator,
            registry,
            config,
            logger,
            metrics,
        }
    }

    /// Registry of running sessions
    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// Run a session for `target` until shutdown or error
    ///
    /// Returns `Ok(())` only when shutdown was requested.
    pub async fn run(
        &self,
        target: &MonitorTarget,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), ReconcileError> {
        let key = &target.pod;
        let mut baseline = self
            .registry
            .resume(key, target.baseline_restarts)
            .unwrap_or_else(|| RestartBaseline::capture(target.baseline_restarts));
        let _guard = SessionGuard::start(
            key.clone(),
            MonitorSession {
                namespace: key.namespace.clone(),
                pod: key.name.clone(),
                deployment: target.deployment.clone(),
                baseline: baseline.clone(),
                last_sample: None,
                remediations: 0,
            },
            self.registry.clone(),
            self.metrics.clone(),
        );
        self.logger.log_monitor_started(
            &key.namespace,
            &key.name,
            &target.deployment,
            baseline.restart_count,
        );

        tokio::select! {
            _ = shutdown::requested(&mut shutdown) => return Ok(()),
            _ = sleep(self.config.settle_delay) => {}
        }

        let period = self.config.monitor_period;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => {
                    info!(key = %key, "Monitoring stopped by shutdown");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let pod = self
                .pods
                .get_pod(key)
                .ok_or_else(|| ReconcileError::PodNotFound(key.to_string()))?;

            let Some(sample) = pod.first_container_restarts() else {
                debug!(key = %key, "No container status in sample, skipping");
                continue;
            };
            self.registry
                .update(key, |session| session.last_sample = Some(sample));

            let delta = baseline.delta(sample);
            debug!(key = %key, baseline = baseline.restart_count, sample, delta, "Sampled restarts");
            if delta < i64::from(self.config.restart_threshold) {
                continue;
            }

            self.logger.log_threshold_crossed(
                &key.namespace,
                &key.name,
                baseline.restart_count,
                sample,
                self.config.restart_threshold,
            );
            if let Err(e) = self
                .remediator
                .scale_to_zero(&key.namespace, &target.deployment)
                .await
            {
                if e.is_retryable() {
                    debug!(key = %key, baseline = baseline.restart_count, "Carrying baseline to the retry");
                    self.registry.carry(key, baseline);
                }
                return Err(e);
            }

            baseline.restart_count = sample;
            self.registry.update(key, |session| {
                session.baseline.restart_count = sample;
                session.remediations += 1;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carried_baseline_is_taken_once() {
        let registry = MonitorRegistry::new();
        let key = PodKey::new("ns", "web-7");
        registry.carry(&key, RestartBaseline::capture(3));

        assert_eq!(registry.carried(&key).map(|b| b.restart_count), Some(3));
        assert_eq!(registry.resume(&key, 4).map(|b| b.restart_count), Some(3));
        assert!(registry.carried(&key).is_none());
        assert!(registry.resume(&key, 4).is_none());
    }

    #[test]
    fn test_carried_baseline_above_current_count_is_ignored() {
        let registry = MonitorRegistry::new();
        let key = PodKey::new("ns", "web-7");
        registry.carry(&key, RestartBaseline::capture(9));

        assert!(registry.resume(&key, 0).is_none());
        assert!(registry.carried(&key).is_none());
    }

    #[test]
    fn test_discard_carried() {
        let registry = MonitorRegistry::new();
        let key = PodKey::new("ns", "web-7");
        registry.carry(&key, RestartBaseline::capture(3));
        registry.discard_carried(&key);

        assert!(registry.carried(&key).is_none());
        assert!(registry.is_empty());
    }
}
