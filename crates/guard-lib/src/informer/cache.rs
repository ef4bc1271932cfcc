//! Local pod cache

use crate::cluster::{pod_snapshot, PodLister};
use crate::error::ReconcileError;
use crate::models::{PodKey, PodSnapshot};
use dashmap::DashMap;
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashSet;
use tokio::sync::watch;
use tracing::debug;

/// Key for a pod object, requiring both namespace and name
pub fn pod_key(pod: &Pod) -> Result<PodKey, ReconcileError> {
    match (pod.metadata.namespace.as_deref(), pod.metadata.name.as_deref()) {
        (Some(namespace), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok(PodKey::new(namespace, name))
        }
        (namespace, name) => Err(ReconcileError::MalformedKey(format!(
            "{}/{}",
            namespace.unwrap_or_default(),
            name.unwrap_or_default()
        ))),
    }
}

/// Eventually-consistent mirror of the watched pods
///
/// Written only by the watcher; everything else reads through
/// [`PodLister`].
pub struct PodCache {
    pods: DashMap<PodKey, Pod>,
    synced: watch::Sender<bool>,
}

impl Default for PodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PodCache {
    /// Empty, unsynced cache
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            pods: DashMap::new(),
            synced,
        }
    }

    /// Store a pod, returning the version it replaced
    pub fn apply(&self, key: PodKey, pod: Pod) -> Option<Pod> {
        self.pods.insert(key, pod)
    }

    /// Evict a pod, returning the cached version
    pub fn remove(&self, key: &PodKey) -> Option<Pod> {
        debug!(key = %key, "Evicting pod from cache");
        self.pods.remove(key).map(|(_, pod)| pod)
    }

    /// Drop every cached pod whose key is not in `live`
    pub fn retain_keys(&self, live: &HashSet<PodKey>) -> usize {
        let before = self.pods.len();
        self.pods.retain(|key, _| live.contains(key));
        before - self.pods.len()
    }

    /// Cached pod object as received from the watch
    pub fn get_raw(&self, key: &PodKey) -> Option<Pod> {
        self.pods.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    /// Record that the initial list has been loaded
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// True once the initial list has been loaded
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the initial list has been loaded
    pub async fn wait_synced(&self) {
        let mut rx = self.synced.subscribe();
        let _ = rx.wait_for(|synced| *synced).await;
    }
}

impl PodLister for PodCache {
    fn get_pod(&self, key: &PodKey) -> Option<PodSnapshot> {
        self.pods.get(key).map(|entry| pod_snapshot(entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::time::Duration;

    fn pod(namespace: &str, name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_key_requires_namespace_and_name() {
        assert_eq!(pod_key(&pod("ns", "a")).unwrap(), PodKey::new("ns", "a"));

        let unnamed = Pod::default();
        assert!(matches!(
            pod_key(&unnamed),
            Err(ReconcileError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_apply_returns_previous() {
        let cache = PodCache::new();
        let key = PodKey::new("ns", "a");

        assert!(cache.apply(key.clone(), pod("ns", "a")).is_none());
        assert!(cache.apply(key.clone(), pod("ns", "a")).is_some());
        assert_eq!(cache.len(), 1);

        let snapshot = cache.get_pod(&key).unwrap();
        assert_eq!(snapshot.name, "a");

        cache.remove(&key);
        assert!(cache.get_pod(&key).is_none());
    }

    #[test]
    fn test_retain_keys_evicts_missing() {
        let cache = PodCache::new();
        for name in ["a", "b", "c"] {
            cache.apply(PodKey::new("ns", name), pod("ns", name));
        }

        let live = HashSet::from([PodKey::new("ns", "b")]);
        assert_eq!(cache.retain_keys(&live), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_raw(&PodKey::new("ns", "b")).is_some());
    }

    #[tokio::test]
    async fn test_wait_synced() {
        let cache = std::sync::Arc::new(PodCache::new());
        assert!(!cache.has_synced());

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.wait_synced().await })
        };
        cache.mark_synced();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(cache.has_synced());
    }
}
