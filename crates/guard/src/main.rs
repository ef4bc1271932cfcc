//! Restart Guard - scales deployments to zero when their pods restart-loop
//!
//! Watches annotated pods, samples their restart counters and scales the
//! owning Deployment to zero replicas once restarts pile up.

use anyhow::{Context, Result};
use guard_lib::{
    cluster::KubeClusterApi,
    controller::Controller,
    health::{components, HealthRegistry},
    informer::{ChangeNotifier, PodCache, PodWatcher},
    observability::{ControllerMetrics, StructuredLogger},
    queue::WorkQueue,
    shutdown,
};
use restart_guard::{api, config::AppConfig, signals};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting restart-guard");

    let config = AppConfig::load()?;
    let controller_config = config.to_controller_config()?;
    info!(
        namespace = config.namespace().unwrap_or("<all>"),
        workers = controller_config.workers,
        monitor_period_secs = config.monitor_period_secs,
        "Restart guard configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::POD_WATCHER).await;
    health_registry.register(components::WORK_QUEUE).await;
    health_registry.register(components::RECONCILER).await;

    let metrics = ControllerMetrics::new();
    let instance = std::env::var("POD_NAME").unwrap_or_else(|_| "restart-guard".to_string());
    let logger = StructuredLogger::new(instance);

    // Kubeconfig first, in-cluster service account otherwise
    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let queue = WorkQueue::new(controller_config.backoff());
    let cache = Arc::new(PodCache::new());
    let notifier = Arc::new(ChangeNotifier::new(queue.clone(), metrics.clone()));
    let cluster = Arc::new(KubeClusterApi::new(client.clone()));

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let signal_handle = tokio::spawn(signals::forward_shutdown(
        signals::wait_for_signal(),
        shutdown_tx,
        logger.clone(),
    ));

    let watcher = PodWatcher::new(
        client,
        config.namespace(),
        cache.clone(),
        notifier,
        health_registry.clone(),
    );
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    let controller = Controller::new(
        queue.clone(),
        cache.clone(),
        cluster,
        controller_config,
        health_registry.clone(),
        logger.clone(),
    );

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        controller.monitors(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Dispatch only once the pod cache holds a full list
    info!("Waiting for pod cache to sync");
    let mut sync_shutdown = shutdown_rx.clone();
    tokio::select! {
        _ = cache.wait_synced() => {
            info!(pods = cache.len(), "Pod cache synced");
        }
        _ = shutdown::requested(&mut sync_shutdown) => {
            info!("Shutdown requested before cache sync");
            if let Err(e) = watcher_handle.await {
                warn!(error = %e, "Pod watcher task failed");
            }
            api_handle.abort();
            return Ok(());
        }
    }

    // Runs until a signal requests shutdown and every worker has exited
    logger.log_startup(GUARD_VERSION, controller.config().workers);
    controller.run(shutdown_rx).await;

    health_registry
        .set_unhealthy(components::WORK_QUEUE, "queue shut down")
        .await;
    if let Err(e) = watcher_handle.await {
        warn!(error = %e, "Pod watcher task failed");
    }
    api_handle.abort();
    signal_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
