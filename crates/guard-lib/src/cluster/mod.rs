//! Cluster access seams
//!
//! The reconciler never talks to the orchestrator directly. It reads pods
//! from a local cache through [`PodLister`] and performs point-in-time reads
//! and the replica update through [`ClusterApi`]. [`KubeClusterApi`] is the
//! production implementation backed by `kube`.

mod kube_api;

pub use kube_api::{
    deployment_snapshot, node_snapshot, pod_snapshot, replica_set_snapshot, KubeClusterApi,
};

use async_trait::async_trait;
use crate::error::ClusterError;
use crate::models::{
    DeploymentSnapshot, NodeSnapshot, PodKey, PodSnapshot, ReplicaSetSnapshot,
};

/// Consistent local reads of pods maintained by the watch subsystem
pub trait PodLister: Send + Sync {
    /// Get a pod by namespace and name, `None` when it is not cached
    fn get_pod(&self, key: &PodKey) -> Option<PodSnapshot>;
}

/// Point-in-time reads and the single write the controller performs
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Get a node by name
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClusterError>;

    /// Get a replica set by namespace and name
    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSetSnapshot, ClusterError>;

    /// Get a deployment by namespace and name
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError>;

    /// Set a deployment's desired replica count
    ///
    /// The update is conditional on `resource_version`: if the deployment
    /// changed since it was fetched the call fails with
    /// [`ClusterError::Conflict`].
    async fn update_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        resource_version: Option<&str>,
    ) -> Result<DeploymentSnapshot, ClusterError>;
}
