//! `kube`-backed cluster access and object conversions

use super::ClusterApi;
use async_trait::async_trait;
use crate::error::ClusterError;
use crate::models::{
    DeploymentSnapshot, NodeCondition, NodeSnapshot, OwnerRef, PodSnapshot, ReplicaSetSnapshot,
};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

/// Cluster API client over a shared `kube::Client`
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClusterError> {
        if name.is_empty() {
            return Err(ClusterError::NotFound {
                kind: "Node",
                name: String::new(),
            });
        }
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get(name).await.map_err(|e| map_kube_error("Node", name, e))?;
        Ok(node_snapshot(&node))
    }

    async fn get_replica_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReplicaSetSnapshot, ClusterError> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let rs = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("ReplicaSet", name, e))?;
        Ok(replica_set_snapshot(&rs))
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deploy = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("Deployment", name, e))?;
        Ok(deployment_snapshot(&deploy))
    }

    async fn update_deployment_replicas(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
        resource_version: Option<&str>,
    ) -> Result<DeploymentSnapshot, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);

        // A merge patch carrying resourceVersion is rejected with 409 when
        // the object moved on since it was read.
        let mut patch = json!({ "spec": { "replicas": replicas } });
        if let Some(version) = resource_version {
            patch["metadata"] = json!({ "resourceVersion": version });
        }
        debug!(namespace = %namespace, deployment = %name, replicas, "Patching deployment replicas");

        let deploy = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error("Deployment", name, e))?;
        Ok(deployment_snapshot(&deploy))
    }
}

/// Map a `kube` error onto the controller's taxonomy
fn map_kube_error(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict {
            kind,
            name: name.to_string(),
        },
        _ => ClusterError::Api(err.to_string()),
    }
}

/// Prefer the managing controller, falling back to the first owner
fn primary_owner(owners: Option<&Vec<OwnerReference>>) -> Option<OwnerRef> {
    let owners = owners?;
    owners
        .iter()
        .find(|o| o.controller == Some(true))
        .or_else(|| owners.first())
        .map(|o| OwnerRef::new(&o.kind, &o.name))
}

/// Reduce a pod to the fields the controller reads
pub fn pod_snapshot(pod: &Pod) -> PodSnapshot {
    let meta = &pod.metadata;
    let status = pod.status.as_ref();

    PodSnapshot {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        owner: primary_owner(meta.owner_references.as_ref()),
        phase: status.and_then(|s| s.phase.clone()),
        restart_counts: status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|c| c.restart_count).collect())
            .unwrap_or_default(),
        node_name: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .filter(|n| !n.is_empty()),
    }
}

pub fn node_snapshot(node: &Node) -> NodeSnapshot {
    NodeSnapshot {
        name: node.metadata.name.clone().unwrap_or_default(),
        conditions: node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| NodeCondition::new(&c.type_, &c.status))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub fn replica_set_snapshot(rs: &ReplicaSet) -> ReplicaSetSnapshot {
    ReplicaSetSnapshot {
        namespace: rs.metadata.namespace.clone().unwrap_or_default(),
        name: rs.metadata.name.clone().unwrap_or_default(),
        owner: primary_owner(rs.metadata.owner_references.as_ref()),
    }
}

pub fn deployment_snapshot(deploy: &Deployment) -> DeploymentSnapshot {
    DeploymentSnapshot {
        namespace: deploy.metadata.namespace.clone().unwrap_or_default(),
        name: deploy.metadata.name.clone().unwrap_or_default(),
        replicas: deploy.spec.as_ref().and_then(|s| s.replicas),
        resource_version: deploy.metadata.resource_version.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, NodeStatus, PodSpec, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn owner(kind: &str, name: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            controller,
            ..Default::default()
        }
    }

    fn container_status(restart_count: i32) -> ContainerStatus {
        ContainerStatus {
            name: "app".to_string(),
            restart_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_snapshot_conversion() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-7".to_string()),
                namespace: Some("ns".to_string()),
                annotations: Some(BTreeMap::from([(
                    "watch-podrestart".to_string(),
                    "true".to_string(),
                )])),
                owner_references: Some(vec![owner("ReplicaSet", "web-7rs", Some(true))]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![container_status(3), container_status(1)]),
                ..Default::default()
            }),
        };

        let snapshot = pod_snapshot(&pod);
        assert_eq!(snapshot.namespace, "ns");
        assert_eq!(snapshot.name, "web-7");
        assert!(snapshot.has_annotation("watch-podrestart"));
        assert_eq!(snapshot.owner, Some(OwnerRef::new("ReplicaSet", "web-7rs")));
        assert_eq!(snapshot.phase.as_deref(), Some("Running"));
        assert_eq!(snapshot.restart_counts, vec![3, 1]);
        assert_eq!(snapshot.node_name.as_deref(), Some("n1"));
    }

    #[test]
    fn test_pod_snapshot_unscheduled() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-8".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(String::new()),
                ..Default::default()
            }),
            status: None,
        };

        let snapshot = pod_snapshot(&pod);
        assert_eq!(snapshot.node_name, None);
        assert!(snapshot.restart_counts.is_empty());
        assert_eq!(snapshot.owner, None);
    }

    #[test]
    fn test_controller_owner_preferred() {
        let owners = vec![
            owner("ConfigMap", "unrelated", None),
            owner("ReplicaSet", "web-7rs", Some(true)),
        ];
        assert_eq!(
            primary_owner(Some(&owners)),
            Some(OwnerRef::new("ReplicaSet", "web-7rs"))
        );

        let owners = vec![owner("StatefulSet", "db", None)];
        assert_eq!(
            primary_owner(Some(&owners)),
            Some(OwnerRef::new("StatefulSet", "db"))
        );
        assert_eq!(primary_owner(None), None);
    }

    #[test]
    fn test_node_snapshot_conversion() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![
                    k8s_openapi::api::core::v1::NodeCondition {
                        type_: "Ready".to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    },
                    k8s_openapi::api::core::v1::NodeCondition {
                        type_: "DiskPressure".to_string(),
                        status: "False".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let snapshot = node_snapshot(&node);
        assert_eq!(snapshot.name, "n1");
        assert!(snapshot.is_condition_true("Ready"));
        assert!(!snapshot.is_condition_true("DiskPressure"));
    }

    #[test]
    fn test_deployment_snapshot_conversion() {
        let deploy = Deployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };

        let snapshot = deployment_snapshot(&deploy);
        assert_eq!(snapshot.replicas, Some(3));
        assert_eq!(snapshot.resource_version.as_deref(), Some("42"));
    }
}
