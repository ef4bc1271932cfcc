//! Core data models for the restart guard
//!
//! These are read-only views of cluster objects, reduced to the fields the
//! reconciler consults. They are produced by the watch cache and the
//! cluster API and never mutated by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ReconcileError;

/// Phase reported by a pod that has not been scheduled or started yet
pub const POD_PHASE_PENDING: &str = "Pending";

/// Owner kind that marks a pod as managed by a deployment
pub const REPLICA_SET_KIND: &str = "ReplicaSet";

/// Owner kind of a replica set's managing object
pub const DEPLOYMENT_KIND: &str = "Deployment";

/// Queue item and cache lookup key for a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` key
    pub fn parse(key: &str) -> Result<Self, ReconcileError> {
        match key.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ReconcileError::MalformedKey(key.to_string())),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Owner reference on a pod or replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// Point-in-time view of a pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub namespace: String,
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub owner: Option<OwnerRef>,
    pub phase: Option<String>,
    /// Restart counters in container status order
    pub restart_counts: Vec<i32>,
    pub node_name: Option<String>,
}

impl PodSnapshot {
    pub fn key(&self) -> PodKey {
        PodKey::new(&self.namespace, &self.name)
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    pub fn is_pending(&self) -> bool {
        self.phase.as_deref() == Some(POD_PHASE_PENDING)
    }

    /// Restart counter of the first container, if the pod reports one
    pub fn first_container_restarts(&self) -> Option<i32> {
        self.restart_counts.first().copied()
    }
}

/// A single node condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub type_: String,
    pub status: String,
}

impl NodeCondition {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
        }
    }
}

/// Point-in-time view of a node's conditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub conditions: Vec<NodeCondition>,
}

impl NodeSnapshot {
    /// Look up a condition by its type name
    pub fn condition_status(&self, condition_type: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.type_ == condition_type)
            .map(|c| c.status.as_str())
    }

    /// True only when the named condition is present and reports "True"
    pub fn is_condition_true(&self, condition_type: &str) -> bool {
        self.condition_status(condition_type) == Some("True")
    }
}

/// Point-in-time view of a replica set's ownership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetSnapshot {
    pub namespace: String,
    pub name: String,
    pub owner: Option<OwnerRef>,
}

/// Point-in-time view of a deployment's scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    pub namespace: String,
    pub name: String,
    pub replicas: Option<i32>,
    /// Object version used for optimistic concurrency on update
    pub resource_version: Option<String>,
}

/// Restart counter captured when a monitoring session starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartBaseline {
    pub restart_count: i32,
    pub started_at: DateTime<Utc>,
}

impl RestartBaseline {
    pub fn capture(restart_count: i32) -> Self {
        Self {
            restart_count,
            started_at: Utc::now(),
        }
    }

    /// Restarts observed since the baseline
    pub fn delta(&self, sample: i32) -> i64 {
        i64::from(sample) - i64::from(self.restart_count)
    }
}
