//! Scale-to-zero remediation

use crate::cluster::ClusterApi;
use crate::error::{ClusterError, ReconcileError};
use crate::models::DeploymentSnapshot;
use crate::observability::{ControllerMetrics, StructuredLogger};
use std::sync::Arc;

/// Halts a deployment by setting its desired replicas to zero
#[derive(Clone)]
pub struct Remediator {
    cluster: Arc<dyn ClusterApi>,
    logger: StructuredLogger,
    metrics: ControllerMetrics,
}

impl Remediator {
    /// Remediator writing deployment scale changes through `cluster`
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        logger: StructuredLogger,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            cluster,
            logger,
            metrics,
        }
    }

    /// Fetch the deployment and write `replicas: 0` against the fetched version
    ///
    /// A concurrent change surfaces as [`ReconcileError::Conflict`] instead
    /// of being retried here with stale data. Scaling a deployment that is
    /// already at zero is a no-op update.
    pub async fn scale_to_zero(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ReconcileError> {
        let result = self.try_scale_to_zero(namespace, name).await;
        match &result {
            Ok((previous, updated)) => {
                self.metrics.inc_remediations();
                self.logger
                    .log_deployment_scaled(namespace, name, *previous, updated.replicas);
            }
            Err(_) => self.metrics.inc_remediation_errors(),
        }
        result.map(|(_, updated)| updated)
    }

    async fn try_scale_to_zero(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(Option<i32>, DeploymentSnapshot), ReconcileError> {
        let qualified = || format!("{namespace}/{name}");
        let map_err = |e: ClusterError| match e {
            ClusterError::NotFound { .. } => ReconcileError::DeploymentNotFound(qualified()),
            ClusterError::Conflict { .. } => ReconcileError::Conflict(qualified()),
            other => ReconcileError::Api(other),
        };

        let current = self
            .cluster
            .get_deployment(namespace, name)
            .await
            .map_err(&map_err)?;

        let updated = self
            .cluster
            .update_deployment_replicas(namespace, name, 0, current.resource_version.as_deref())
            .await
            .map_err(&map_err)?;

        Ok((current.replicas, updated))
    }
}
