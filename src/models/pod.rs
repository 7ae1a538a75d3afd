use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Affinity, Resource, Taint, Toleration};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl Default for PodPhase {
    fn default() -> Self {
        PodPhase::Pending
    }
}

impl PodPhase {
    /// Non-terminated phases the cache accepts; Succeeded/Failed/Unknown are filtered upstream.
    pub fn is_active(&self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub resources: Resource,
    #[serde(default)]
    pub priority: u64,
    #[serde(default)]
    pub scheduling_gates: Vec<String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
    #[serde(default)]
    pub affinity: Option<Affinity>,
}

/// Carries the info a scheduling attempt needs to order its pod in the active queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueuedInfo {
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub owner_uid: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub phase: PodPhase,
    pub spec: PodSpec,
    pub queued_info: QueuedInfo,
    pub scheduled: Option<String>,
    /// Gang size threshold for the PodSet this pod belongs to (all pods sharing an `owner_uid`
    /// carry the same value). A lone, non-gang pod defaults to 1.
    #[serde(default = "PodInfo::default_min_available")]
    pub min_available: u64,
}

impl Default for PodInfo {
    fn default() -> Self {
        Self {
            uid: String::default(),
            owner_uid: String::default(),
            namespace: String::default(),
            name: String::default(),
            phase: PodPhase::default(),
            spec: PodSpec::default(),
            queued_info: QueuedInfo::default(),
            scheduled: None,
            min_available: Self::default_min_available(),
        }
    }
}

impl PodInfo {
    fn default_min_available() -> u64 {
        1
    }

    /// `node_name` checked against every taint a node declares, using the pod's tolerations.
    pub fn tolerates_all(&self, taints: &[Taint]) -> bool {
        taints
            .iter()
            .all(|t| self.spec.tolerations.iter().any(|to| to.tolerate(t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_pending_and_active() {
        let pod = PodInfo::default();
        assert_eq!(pod.phase, PodPhase::Pending);
        assert!(pod.phase.is_active());
    }

    #[test]
    fn terminal_phases_are_not_active() {
        assert!(!PodPhase::Succeeded.is_active());
        assert!(!PodPhase::Failed.is_active());
        assert!(!PodPhase::Unknown.is_active());
    }
}
