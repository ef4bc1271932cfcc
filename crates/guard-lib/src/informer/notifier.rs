//! Pod change notification

use super::pod_key;
use crate::models::PodKey;
use crate::observability::ControllerMetrics;
use crate::queue::WorkQueue;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, warn};

/// Callbacks the watch subsystem delivers for each pod change
pub trait PodEventHandler: Send + Sync {
    fn on_add(&self, pod: &Pod);
    fn on_update(&self, old: &Pod, new: &Pod);
}

/// Whether an update carries a change the reconciler could act on
///
/// Compares the fields that feed reconciliation and ignores metadata churn
/// such as resource version bumps and managed fields.
pub fn pod_changed(old: &Pod, new: &Pod) -> bool {
    old.metadata.annotations != new.metadata.annotations
        || old.metadata.labels != new.metadata.labels
        || old.metadata.owner_references != new.metadata.owner_references
        || old.metadata.deletion_timestamp != new.metadata.deletion_timestamp
        || old.spec != new.spec
        || old.status != new.status
}

/// Turns pod notifications into work queue entries
pub struct ChangeNotifier {
    queue: WorkQueue<PodKey>,
    metrics: ControllerMetrics,
}

impl ChangeNotifier {
    /// Notifier feeding `queue`
    pub fn new(queue: WorkQueue<PodKey>, metrics: ControllerMetrics) -> Self {
        Self { queue, metrics }
    }

    fn enqueue(&self, pod: &Pod) {
        match pod_key(pod) {
            Ok(key) => {
                debug!(key = %key, "Enqueueing pod");
                self.queue.add(key);
                self.metrics.set_queue_depth(self.queue.len() as i64);
            }
            Err(e) => warn!(error = %e, "Ignoring pod without a usable key"),
        }
    }
}

impl PodEventHandler for ChangeNotifier {
    fn on_add(&self, pod: &Pod) {
        self.metrics.inc_pod_event("add");
        self.enqueue(pod);
    }

    fn on_update(&self, old: &Pod, new: &Pod) {
        if !pod_changed(old, new) {
            self.metrics.inc_pod_event("unchanged");
            return;
        }
        self.metrics.inc_pod_event("update");
        self.enqueue(new);
    }
}
