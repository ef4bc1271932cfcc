//! Integration tests for the restart guard API endpoints

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use guard_lib::{
    cluster::{ClusterApi, PodLister},
    controller::{ControllerConfig, MonitorRegistry, Reconciler},
    error::ClusterError,
    health::{components, HealthRegistry},
    models::{
        DeploymentSnapshot, NodeCondition, NodeSnapshot, OwnerRef, PodKey, PodSnapshot,
        ReplicaSetSnapshot,
    },
    observability::{ControllerMetrics, StructuredLogger},
    shutdown,
};
use restart_guard::api::{create_router, AppState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app(monitors: MonitorRegistry) -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::POD_WATCHER).await;
    health_registry.register(components::WORK_QUEUE).await;
    health_registry.register(components::RECONCILER).await;

    let metrics = ControllerMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics, monitors));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app(MonitorRegistry::new()).await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["pod_watcher"].is_object());
    assert!(health["components"]["reconciler"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app(MonitorRegistry::new()).await;
    state
        .health_registry
        .set_degraded(components::POD_WATCHER, "watch stream error")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["pod_watcher"]["message"],
        "watch stream error"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app(MonitorRegistry::new()).await;
    state
        .health_registry
        .set_unhealthy(components::POD_WATCHER, "watch stream ended")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_until_cache_synced() {
    let (app, _state) = setup_test_app(MonitorRegistry::new()).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Pod cache not yet synced");
}

#[tokio::test]
async fn test_readyz_returns_ok_when_synced() {
    let (app, state) = setup_test_app(MonitorRegistry::new()).await;
    state.health_registry.set_synced(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
    assert!(readiness.get("reason").is_none());
}

#[tokio::test]
async fn test_readyz_returns_503_when_synced_but_unhealthy() {
    let (app, state) = setup_test_app(MonitorRegistry::new()).await;
    state.health_registry.set_synced(true).await;
    state
        .health_registry
        .set_unhealthy(components::RECONCILER, "stuck")
        .await;

    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app(MonitorRegistry::new()).await;
    state.metrics.set_queue_depth(3);
    state.metrics.inc_remediations();
    state.metrics.inc_reconcile("skipped");

    let (status, body) = get(app, "/metrics").await;
    let body = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("# TYPE restart_guard_queue_depth gauge"));
    assert!(body.contains("restart_guard_remediations_total"));
    assert!(body.contains("restart_guard_reconciles_total{outcome=\"skipped\"}"));
    assert!(body.contains("restart_guard_reconcile_duration_seconds_bucket"));
}

#[tokio::test]
async fn test_monitors_empty() {
    let (app, _state) = setup_test_app(MonitorRegistry::new()).await;

    let (status, sessions) = get_json(app, "/monitors").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions, serde_json::json!([]));
}

/// One eligible pod `shop/cart-1` on a ready node
struct SinglePodCluster;

fn cart_pod() -> PodSnapshot {
    PodSnapshot {
        namespace: "shop".to_string(),
        name: "cart-1".to_string(),
        annotations: BTreeMap::from([("watch-podrestart".to_string(), "true".to_string())]),
        owner: Some(OwnerRef::new("ReplicaSet", "cart-5d4")),
        phase: Some("Running".to_string()),
        restart_counts: vec![7],
        node_name: Some("n1".to_string()),
    }
}

impl PodLister for SinglePodCluster {
    fn get_pod(&self, key: &PodKey) -> Option<PodSnapshot> {
        (*key == cart_pod().key()).then(cart_pod)
    }
}

#[async_trait]
impl ClusterApi for SinglePodCluster {
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClusterError> {
        Ok(NodeSnapshot {
            name: name.to_string(),
            conditions: vec![NodeCondition::new("Ready", "True")],
        })
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSetSnapshot, ClusterError> {
        Ok(ReplicaSetSnapshot {
            namespace: namespace.to_string(),
            name: name.to_string(),
            owner: Some(OwnerRef::new("Deployment", "cart")),
        })
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        Ok(DeploymentSnapshot {
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: Some(2),
            resource_version: None,
        })
    }

    async fn update_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        _resource_version: Option<&str>,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        Ok(DeploymentSnapshot {
            namespace: namespace.to_string(),
            name: name.to_string(),
            replicas: Some(replicas),
            resource_version: None,
        })
    }
}

#[tokio::test]
async fn test_monitors_lists_active_sessions() {
    let cluster = Arc::new(SinglePodCluster);
    let config = ControllerConfig {
        settle_delay: Duration::from_secs(3600),
        ..Default::default()
    };
    let reconciler = Arc::new(Reconciler::new(
        cluster.clone(),
        cluster,
        Arc::new(config),
        StructuredLogger::new("test"),
        ControllerMetrics::new(),
    ));

    let (tx, rx) = shutdown::channel();
    let session = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .reconcile(&PodKey::new("shop", "cart-1"), rx)
                .await
        })
    };
    for _ in 0..200 {
        if !reconciler.monitors().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (app, _state) = setup_test_app(reconciler.monitors().clone()).await;
    let (status, sessions) = get_json(app, "/monitors").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["namespace"], "shop");
    assert_eq!(sessions[0]["pod"], "cart-1");
    assert_eq!(sessions[0]["deployment"], "cart");
    assert_eq!(sessions[0]["baseline"]["restart_count"], 7);
    assert!(sessions[0]["baseline"]["started_at"].is_string());
    assert_eq!(sessions[0]["remediations"], 0);

    tx.send(true).unwrap();
    session.await.unwrap().unwrap();
    assert!(reconciler.monitors().is_empty());
}
