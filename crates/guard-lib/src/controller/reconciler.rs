//! Per-pod reconciliation decision
//!
//! Checks run from cheapest and most common to most specific, so the bulk
//! of irrelevant pod events end before any ownership lookups:
//!
//! 1. pod in cache (else `PodNotFound`)
//! 2. assigned node resolvable (else no-op)
//! 3. opt-in annotation present (else no-op)
//! 4. owned by a ReplicaSet (else no-op)
//! 5. ReplicaSet resolvable and owned by a Deployment
//! 6. pod not Pending
//! 7. node readiness condition is "True"
//!
//! Only then does the pod enter a [`RestartMonitor`] session, which runs
//! inside the calling worker until shutdown or an error ends it.

use super::{ControllerConfig, MonitorRegistry, Remediator, RestartMonitor};
use crate::cluster::{ClusterApi, PodLister};
use crate::error::{ClusterError, ReconcileError};
use crate::models::{PodKey, DEPLOYMENT_KIND, REPLICA_SET_KIND};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use tracing::debug;

/// Why a pod was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NodeNotFound,
    NotOptedIn,
    NotReplicaSetOwned,
    NoDeploymentOwner,
    PodPending,
    NodeNotReady,
    NoContainerStatus,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NodeNotFound => "node_not_found",
            SkipReason::NotOptedIn => "not_opted_in",
            SkipReason::NotReplicaSetOwned => "not_replicaset_owned",
            SkipReason::NoDeploymentOwner => "no_deployment_owner",
            SkipReason::PodPending => "pod_pending",
            SkipReason::NodeNotReady => "node_not_ready",
            SkipReason::NoContainerStatus => "no_container_status",
        }
    }
}

/// Everything a monitoring session needs about its pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub pod: PodKey,
    pub deployment: String,
    /// First-container restart count when the decision was made
    pub baseline_restarts: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Monitor(MonitorTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    /// A monitoring session ran and ended on shutdown
    Monitored,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Skipped(reason) => reason.as_str(),
            ReconcileOutcome::Monitored => "monitored",
        }
    }
}

/// Turns a queued pod key into a decision and, when eligible, a monitoring session
pub struct Reconciler {
    pods: Arc<dyn PodLister>,
    cluster: Arc<dyn ClusterApi>,
    config: Arc<ControllerConfig>,
    monitor: RestartMonitor,
}

impl Reconciler {
    /// Reconciler with its own monitor and an empty session registry
    pub fn new(
        pods: Arc<dyn PodLister>,
        cluster: Arc<dyn ClusterApi>,
        config: Arc<ControllerConfig>,
        logger: StructuredLogger,
        metrics: ControllerMetrics,
    ) -> Self {
        let remediator = Remediator::new(cluster.clone(), logger.clone(), metrics.clone());
        let monitor = RestartMonitor::new(
            pods.clone(),
            remediator,
            MonitorRegistry::new(),
            config.clone(),
            logger,
            metrics,
        );
        Self {
            pods,
            cluster,
            config,
            monitor,
        }
    }

    /// Active monitoring sessions
    pub fn monitors(&self) -> &MonitorRegistry {
        self.monitor.registry()
    }

    /// Decide and, when every precondition holds, monitor the pod
    pub async fn reconcile(
        &self,
        key: &PodKey,
        shutdown: ShutdownSignal,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.decide(key).await? {
            Decision::Skip(reason) => {
                debug!(key = %key, reason = reason.as_str(), "Skipping pod");
                self.monitors().discard_carried(key);
                Ok(ReconcileOutcome::Skipped(reason))
            }
            Decision::Monitor(target) => {
                self.monitor.run(&target, shutdown).await?;
                Ok(ReconcileOutcome::Monitored)
            }
        }
    }

    /// Run the precondition checks without monitoring
    pub async fn decide(&self, key: &PodKey) -> Result<Decision, ReconcileError> {
        let pod = self
            .pods
            .get_pod(key)
            .ok_or_else(|| ReconcileError::PodNotFound(key.to_string()))?;

        let node = match pod.node_name.as_deref() {
            Some(node_name) => match self.cluster.get_node(node_name).await {
                Ok(node) => node,
                Err(ClusterError::NotFound { .. }) => {
                    return Ok(Decision::Skip(SkipReason::NodeNotFound))
                }
                Err(e) => return Err(ReconcileError::Api(e)),
            },
            None => return Ok(Decision::Skip(SkipReason::NodeNotFound)),
        };

        if !pod.has_annotation(&self.config.annotation_key) {
            return Ok(Decision::Skip(SkipReason::NotOptedIn));
        }

        let rs_name = match &pod.owner {
            Some(owner) if owner.is_kind(REPLICA_SET_KIND) => owner.name.as_str(),
            _ => return Ok(Decision::Skip(SkipReason::NotReplicaSetOwned)),
        };

        let replica_set = self
            .cluster
            .get_replica_set(&key.namespace, rs_name)
            .await
            .map_err(|e| match e {
                ClusterError::NotFound { .. } => {
                    ReconcileError::ReplicaSetNotFound(format!("{}/{}", key.namespace, rs_name))
                }
                other => ReconcileError::Api(other),
            })?;

        let deployment = match replica_set.owner {
            Some(owner) if owner.is_kind(DEPLOYMENT_KIND) => owner.name,
            _ => return Ok(Decision::Skip(SkipReason::NoDeploymentOwner)),
        };

        if pod.is_pending() {
            return Ok(Decision::Skip(SkipReason::PodPending));
        }

        if !node.is_condition_true(&self.config.node_ready_condition) {
            return Ok(Decision::Skip(SkipReason::NodeNotReady));
        }

        let Some(baseline_restarts) = pod.first_container_restarts() else {
            return Ok(Decision::Skip(SkipReason::NoContainerStatus));
        };

        Ok(Decision::Monitor(MonitorTarget {
            pod: key.clone(),
            deployment,
            baseline_restarts,
        }))
    }
}
