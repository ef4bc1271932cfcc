//! Pod watch task
//!
//! Drives a `kube` watch stream into the [`PodCache`] and turns each
//! cache transition into an add or update notification.

use super::{pod_key, PodCache, PodEventHandler};
use crate::health::{components, HealthRegistry};
use crate::shutdown::{self, ShutdownSignal};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::{Api, Client};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Pause after a watch error before polling the stream again
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Applies watch events to the cache and notifies the handler
///
/// `Applied` is an add when the pod was not cached and an update against
/// the cached version otherwise. `Restarted` carries the full pod list:
/// every pod goes through the same add/update path, pods missing from the
/// list are evicted, and the first one marks the cache synced.
pub struct WatchEventApplier {
    cache: Arc<PodCache>,
    handler: Arc<dyn PodEventHandler>,
    health: HealthRegistry,
}

impl WatchEventApplier {
    /// Applier writing into `cache` and notifying `handler`
    pub fn new(
        cache: Arc<PodCache>,
        handler: Arc<dyn PodEventHandler>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            cache,
            handler,
            health,
        }
    }

    /// Apply one watch event
    pub async fn handle(&self, event: Event<Pod>) {
        match event {
            Event::Applied(pod) => self.apply(pod),
            Event::Deleted(pod) => {
                if let Ok(key) = pod_key(&pod) {
                    self.cache.remove(&key);
                }
            }
            Event::Restarted(pods) => {
                let mut live = HashSet::with_capacity(pods.len());
                for pod in pods {
                    if let Ok(key) = pod_key(&pod) {
                        live.insert(key);
                    }
                    self.apply(pod);
                }
                let evicted = self.cache.retain_keys(&live);
                debug!(pods = live.len(), evicted, "Pod watch resynced");

                if !self.cache.has_synced() {
                    info!(pods = live.len(), "Pod cache synced");
                    self.cache.mark_synced();
                    self.health.set_synced(true).await;
                }
            }
        }
        self.health.set_healthy(components::POD_WATCHER).await;
    }

    /// Consume `stream` until shutdown is requested or the stream ends
    ///
    /// A stream error degrades the watcher and pauses before the next poll;
    /// the pause is cut short by shutdown.
    pub async fn drive<S>(&self, stream: S, mut shutdown: ShutdownSignal)
    where
        S: Stream<Item = Result<Event<Pod>, watcher::Error>>,
    {
        tokio::pin!(stream);

        loop {
            let next = tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(event)) => self.handle(event).await,
                Some(Err(e)) => {
                    warn!(error = %e, "Pod watch error");
                    self.health
                        .set_degraded(components::POD_WATCHER, e.to_string())
                        .await;
                    tokio::select! {
                        _ = shutdown::requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
                None => {
                    warn!("Pod watch stream ended");
                    self.health
                        .set_unhealthy(components::POD_WATCHER, "watch stream ended")
                        .await;
                    return;
                }
            }
        }
        info!("Shutting down pod watcher");
    }

    fn apply(&self, pod: Pod) {
        let key = match pod_key(&pod) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Ignoring pod without a usable key");
                return;
            }
        };
        match self.cache.apply(key, pod.clone()) {
            None => self.handler.on_add(&pod),
            Some(old) => self.handler.on_update(&old, &pod),
        }
    }
}

/// Pod watch over the cluster API
pub struct PodWatcher {
    api: Api<Pod>,
    applier: WatchEventApplier,
}

impl PodWatcher {
    /// Watch pods in `namespace`, or across the cluster when `None`
    pub fn new(
        client: Client,
        namespace: Option<&str>,
        cache: Arc<PodCache>,
        handler: Arc<dyn PodEventHandler>,
        health: HealthRegistry,
    ) -> Self {
        let api = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        Self {
            api,
            applier: WatchEventApplier::new(cache, handler, health),
        }
    }

    /// Run until shutdown is requested or the stream ends
    pub async fn run(self, shutdown: ShutdownSignal) {
        info!("Starting pod watcher");
        let stream = watcher(self.api.clone(), watcher::Config::default());
        self.applier.drive(stream, shutdown).await;
    }
}
