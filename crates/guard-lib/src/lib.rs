//! Restart guard library
//!
//! This crate provides the core functionality for:
//! - Mirroring workload pods into a local cache and filtering no-op updates
//! - A deduplicating, rate-limited reconciliation work queue
//! - The per-pod reconciliation decision and restart monitoring
//! - Scaling the owning deployment to zero when restarts pile up
//! - Health checks and observability

pub mod cluster;
pub mod controller;
pub mod error;
pub mod health;
pub mod informer;
pub mod models;
pub mod observability;
pub mod queue;
pub mod shutdown;

pub use cluster::{ClusterApi, KubeClusterApi, PodLister};
pub use controller::{Controller, ControllerConfig, MonitorRegistry, MonitorSession, Reconciler};
pub use error::{ClusterError, ConfigError, ReconcileError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use informer::{ChangeNotifier, PodCache, PodWatcher};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use queue::{ExponentialBackoff, WorkQueue};
pub use shutdown::ShutdownSignal;
