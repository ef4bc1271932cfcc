//! Error types for cluster access, reconciliation and configuration

use thiserror::Error;

/// Errors returned by the cluster API collaborators
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Typed reconciliation failures that drive the retry policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("malformed pod key {0:?}")]
    MalformedKey(String),

    #[error("pod {0} not found")]
    PodNotFound(String),

    #[error("replicaset {0} not found")]
    ReplicaSetNotFound(String),

    #[error("deployment {0} not found")]
    DeploymentNotFound(String),

    #[error("deployment {0} changed during update")]
    Conflict(String),

    #[error(transparent)]
    Api(ClusterError),
}

impl ReconcileError {
    /// Whether the failure should be retried through the rate-limited queue
    ///
    /// Missing objects and malformed keys are terminal: the next watch event
    /// for the pod re-enqueues it if there is anything left to do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_) | ReconcileError::Api(_))
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::MalformedKey(_) => "malformed_key",
            ReconcileError::PodNotFound(_) => "pod_not_found",
            ReconcileError::ReplicaSetNotFound(_) => "replicaset_not_found",
            ReconcileError::DeploymentNotFound(_) => "deployment_not_found",
            ReconcileError::Conflict(_) => "conflict",
            ReconcileError::Api(_) => "api",
        }
    }
}

/// Rejected controller settings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy() {
        assert!(!ReconcileError::MalformedKey("x".into()).is_retryable());
        assert!(!ReconcileError::PodNotFound("ns/p".into()).is_retryable());
        assert!(!ReconcileError::ReplicaSetNotFound("ns/rs".into()).is_retryable());
        assert!(!ReconcileError::DeploymentNotFound("ns/d".into()).is_retryable());
        assert!(ReconcileError::Conflict("ns/d".into()).is_retryable());
        assert!(ReconcileError::Api(ClusterError::Api("timeout".into())).is_retryable());
    }

    #[test]
    fn test_cluster_error_display() {
        let err = ClusterError::NotFound {
            kind: "Node",
            name: "n1".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Node n1 not found");
    }
}
