//! Worker pool and retry handling
//!
//! `workers` tasks pull pod keys from the shared [`WorkQueue`] and drive
//! each through the [`Reconciler`]. A key that enters monitoring holds its
//! worker for the whole session; other keys wait for the remaining workers.
//! Events for a pod under monitoring are coalesced by the queue and
//! delivered once the session ends.

use super::{ControllerConfig, MonitorRegistry, ReconcileOutcome, Reconciler};
use crate::cluster::{ClusterApi, PodLister};
use crate::error::ReconcileError;
use crate::health::{components, HealthRegistry};
use crate::models::PodKey;
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::queue::WorkQueue;
use crate::shutdown::{self, ShutdownSignal};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reconciliation controller: queue, workers and retry policy
#[derive(Clone)]
pub struct Controller {
    queue: WorkQueue<PodKey>,
    reconciler: Arc<Reconciler>,
    config: Arc<ControllerConfig>,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl Controller {
    /// Build a controller draining `queue`
    ///
    /// The queue is expected to be fed by a pod event source such as the
    /// [`ChangeNotifier`](crate::informer::ChangeNotifier).
    pub fn new(
        queue: WorkQueue<PodKey>,
        pods: Arc<dyn PodLister>,
        cluster: Arc<dyn ClusterApi>,
        config: ControllerConfig,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        let metrics = ControllerMetrics::new();
        let config = Arc::new(config);
        let reconciler = Arc::new(Reconciler::new(
            pods,
            cluster,
            config.clone(),
            logger.clone(),
            metrics.clone(),
        ));
        Self {
            queue,
            reconciler,
            config,
            health,
            logger,
            metrics,
        }
    }

    /// Queue the workers drain
    pub fn queue(&self) -> &WorkQueue<PodKey> {
        &self.queue
    }

    /// Configuration the controller was built with
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Handle to the running monitoring sessions, shared with the reconciler
    pub fn monitors(&self) -> MonitorRegistry {
        self.reconciler.monitors().clone()
    }

    /// Run the worker pool until shutdown is requested
    ///
    /// On shutdown the queue stops delivering, running monitoring sessions
    /// end, and this returns once every worker has exited.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(workers = self.config.workers, "Starting controller workers");

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let controller = self.clone();
            let worker_shutdown = shutdown.clone();
            workers.spawn(async move { controller.worker(id, worker_shutdown).await });
        }

        shutdown::requested(&mut shutdown).await;
        info!("Stopping controller workers");
        self.queue.shut_down();

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Controller worker failed");
            }
        }
        info!("Controller workers stopped");
    }

    async fn worker(&self, id: usize, shutdown: ShutdownSignal) {
        debug!(worker = id, "Worker started");
        while self.process_next_item(shutdown.clone()).await {}
        debug!(worker = id, "Worker exited");
    }

    /// Process one key; `false` once the queue has shut down
    pub async fn process_next_item(&self, shutdown: ShutdownSignal) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        self.metrics.set_queue_depth(self.queue.len() as i64);

        let start = Instant::now();
        let result = self.reconciler.reconcile(&key, shutdown).await;
        self.metrics
            .observe_reconcile_duration(start.elapsed().as_secs_f64());

        self.handle_result(&key, result).await;
        self.queue.done(&key);
        true
    }

    /// Map a reconcile result onto queue actions
    async fn handle_result(&self, key: &PodKey, result: Result<ReconcileOutcome, ReconcileError>) {
        let err = match result {
            Ok(outcome) => {
                self.queue.forget(key);
                self.metrics.inc_reconcile(outcome.as_str());
                self.health.set_healthy(components::RECONCILER).await;
                return;
            }
            Err(err) => err,
        };
        self.metrics.inc_reconcile(err.kind());

        let requeues = self.queue.num_requeues(key);
        if !err.is_retryable() {
            self.queue.forget(key);
            self.reconciler.monitors().discard_carried(key);
            self.metrics.inc_dropped();
            self.logger
                .log_dropped(&key.to_string(), "non_retryable", requeues, &err.to_string());
            return;
        }

        if requeues < self.config.max_retries {
            debug!(key = %key, requeues, error = %err, "Requeueing after retryable error");
            self.queue.add_rate_limited(key.clone());
            self.metrics.inc_requeues();
            return;
        }

        self.queue.forget(key);
        self.reconciler.monitors().discard_carried(key);
        self.metrics.inc_dropped();
        self.logger
            .log_dropped(&key.to_string(), "retries_exhausted", requeues, &err.to_string());
        self.health
            .set_degraded(
                components::RECONCILER,
                format!("gave up on {key} after {requeues} retries: {err}"),
            )
            .await;
    }
}
