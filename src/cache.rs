//! The scheduling cache: the single in-memory mirror of cluster state that every policy and
//! the controller read from. A mutex guards the three resident maps (pods, nodes, consumers);
//! mutation is always delete-then-add so residency bookkeeping (a node's resident pod set and
//! its accepted-allocated total) never drifts even across out-of-order or duplicate events.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{ConsumerInfo, NodeInfo, PodInfo, PodSet};

/// An independent, point-in-time copy of cache state. Policies and the session framework work
/// exclusively off snapshots so a scheduling cycle never observes a map mutating underneath it.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub pods: HashMap<String, PodInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub consumers: HashMap<String, ConsumerInfo>,
}

impl Snapshot {
    /// Groups resident pods by `owner_uid` into PodSets. A pod with an empty `owner_uid` is
    /// its own singleton PodSet keyed by its own name, matching a lone pod's default
    /// `min_available == 1`.
    pub fn pod_sets(&self) -> Vec<PodSet> {
        let mut by_owner: HashMap<String, PodSet> = HashMap::new();
        for pod in self.pods.values() {
            let key = if pod.owner_uid.is_empty() {
                format!("{}/{}", pod.namespace, pod.name)
            } else {
                pod.owner_uid.clone()
            };
            let set = by_owner.entry(key).or_insert_with(|| {
                PodSet::new(
                    pod.owner_uid.clone(),
                    pod.namespace.clone(),
                    pod.name.clone(),
                    pod.min_available,
                )
            });
            set.min_available = set.min_available.max(pod.min_available);
            set.add_pod(pod.clone());
        }
        let mut sets: Vec<PodSet> = by_owner.into_values().collect();
        sets.sort_by(|a, b| a.dictionary_key().cmp(&b.dictionary_key()));
        sets
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    pub fn pod(&self, name: &str) -> Option<&PodInfo> {
        self.pods.get(name)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    pods: HashMap<String, PodInfo>,
    nodes: HashMap<String, NodeInfo>,
    consumers: HashMap<String, ConsumerInfo>,
}

impl CacheState {
    /// Removes a pod's residency footprint from its node, if it has one. Returns the removed
    /// pod, if any, so callers can inspect it before deciding what to insert in its place.
    fn remove_pod(&mut self, name: &str) -> Option<PodInfo> {
        let old = self.pods.remove(name)?;
        if let Some(node_name) = &old.scheduled {
            if let Some(node) = self.nodes.get_mut(node_name) {
                node.pods.remove(name);
                node.requested = node.requested.sub(&old.spec.resources);
            }
        }
        Some(old)
    }

    /// Adds a pod's residency footprint to its node (synthesizing a placeholder if the node
    /// hasn't been observed yet) and inserts the pod itself.
    fn insert_pod(&mut self, pod: PodInfo) {
        if let Some(node_name) = pod.scheduled.clone() {
            let node = self
                .nodes
                .entry(node_name.clone())
                .or_insert_with(|| NodeInfo::placeholder(&node_name));
            node.pods.insert(pod.name.clone());
            node.requested = node.requested.add(&pod.spec.resources);
        }
        self.pods.insert(pod.name.clone(), pod);
    }

    fn upsert_node(&mut self, mut node: NodeInfo) {
        if let Some(existing) = self.nodes.remove(&node.name) {
            node.pods = existing.pods;
            node.requested = existing.requested;
            node.unaccepted = existing.unaccepted;
        }
        self.nodes.insert(node.name.clone(), node);
    }
}

/// The resident cluster-state mirror.
#[derive(Default)]
pub struct Cache {
    inner: Mutex<CacheState>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CacheState) -> R) -> R {
        let mut state = self.inner.lock().expect("scheduling cache mutex poisoned");
        f(&mut state)
    }

    /// Idempotent upsert: applying the same pod twice is a no-op beyond the first application.
    /// A pod observed in a terminal phase (Succeeded/Failed/Unknown) is removed rather than
    /// stored — the cache only ever holds active pods.
    pub fn update_pod(&self, pod: PodInfo) {
        self.with_state(|s| {
            s.remove_pod(&pod.name);
            if pod.phase.is_active() {
                s.insert_pod(pod);
            }
        });
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.update_pod(pod);
    }

    pub fn delete_pod(&self, name: &str) {
        self.with_state(|s| {
            s.remove_pod(name);
        });
    }

    /// Tentatively places `pod_name` on `host`: debits the host's accepted-allocated total by
    /// the pod's request before any external bind acknowledgement arrives. The pod's phase is
    /// left untouched — only a real update event transitions it to Running.
    pub fn assume_pod(&self, pod_name: &str, host: &str) -> bool {
        self.with_state(|s| {
            let Some(mut pod) = s.pods.get(pod_name).cloned() else {
                return false;
            };
            s.remove_pod(pod_name);
            pod.scheduled = Some(host.to_string());
            s.insert_pod(pod);
            true
        })
    }

    /// Reverts a tentative placement made by `assume_pod`, crediting the host back.
    pub fn unassume_pod(&self, pod_name: &str) -> bool {
        self.with_state(|s| {
            let Some(mut pod) = s.pods.get(pod_name).cloned() else {
                return false;
            };
            s.remove_pod(pod_name);
            pod.scheduled = None;
            s.insert_pod(pod);
            true
        })
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.with_state(|s| s.upsert_node(node));
    }

    pub fn update_node(&self, node: NodeInfo) {
        self.with_state(|s| s.upsert_node(node));
    }

    /// Removes a node outright. Pods still pointing at it become orphaned residency entries
    /// until their own delete events arrive — the cache does not proactively re-home or evict
    /// them; a relist of the pod objects will correct the state.
    pub fn delete_node(&self, name: &str) {
        self.with_state(|s| {
            s.nodes.remove(name);
        });
    }

    pub fn add_consumer(&self, consumer: ConsumerInfo) {
        self.with_state(|s| {
            s.consumers.insert(consumer.key(), consumer);
        });
    }

    pub fn update_consumer(&self, consumer: ConsumerInfo) {
        self.add_consumer(consumer);
    }

    pub fn delete_consumer(&self, namespace: &str, name: &str) {
        self.with_state(|s| {
            s.consumers.remove(&format!("{namespace}/{name}"));
        });
    }

    /// An independent, deep-cloned copy of the cache's current state.
    pub fn snapshot(&self) -> Snapshot {
        self.with_state(|s| Snapshot {
            pods: s.pods.clone(),
            nodes: s.nodes.clone(),
            consumers: s.consumers.clone(),
        })
    }

    pub fn pod(&self, name: &str) -> Option<PodInfo> {
        self.with_state(|s| s.pods.get(name).cloned())
    }

    pub fn node(&self, name: &str) -> Option<NodeInfo> {
        self.with_state(|s| s.nodes.get(name).cloned())
    }
}
