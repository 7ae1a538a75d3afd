use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Resource, Taint};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// Mirrors a cluster node. `requested` is the node's *accepted* allocated resource (§4.3);
/// `unaccepted` holds tentative debits made during a gang min-available trial and must be zero
/// outside of a tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub allocatable: Resource,
    #[serde(default)]
    pub requested: Resource,
    #[serde(default)]
    pub unaccepted: Resource,
    #[serde(default)]
    pub pods: HashSet<String>,
}

impl NodeInfo {
    /// `allocatable − requested − unaccepted`, never negative by construction (see `Resource::sub`).
    pub fn current_idle(&self) -> Resource {
        self.allocatable.sub(&self.requested).sub(&self.unaccepted)
    }

    pub fn fits(&self, request: &Resource) -> bool {
        request.less_equal(&self.current_idle())
    }

    /// Debits `request` as a tentative, unaccepted placement.
    pub fn debit_unaccepted(&mut self, request: &Resource) {
        self.unaccepted = self.unaccepted.add(request);
    }

    pub fn credit_unaccepted(&mut self, request: &Resource) {
        self.unaccepted = self.unaccepted.sub(request);
    }

    /// Folds a tentative debit into the accepted total — the gang min-available accept step.
    pub fn accept(&mut self, request: &Resource) {
        self.unaccepted = self.unaccepted.sub(request);
        self.requested = self.requested.add(request);
    }

    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_idle_subtracts_both_requested_and_unaccepted() {
        let mut node = NodeInfo {
            allocatable: Resource::new(10, 10),
            ..Default::default()
        };
        node.requested = Resource::new(3, 3);
        node.unaccepted = Resource::new(2, 2);
        assert_eq!(node.current_idle(), Resource::new(5, 5));
    }

    #[test]
    fn accept_moves_unaccepted_into_requested() {
        let mut node = NodeInfo {
            allocatable: Resource::new(10, 10),
            ..Default::default()
        };
        node.debit_unaccepted(&Resource::new(4, 4));
        node.accept(&Resource::new(4, 4));
        assert_eq!(node.requested, Resource::new(4, 4));
        assert!(node.unaccepted.is_zero());
    }

    #[test]
    fn fits_checks_current_idle() {
        let node = NodeInfo {
            allocatable: Resource::new(2, 2),
            ..Default::default()
        };
        assert!(node.fits(&Resource::new(2, 2)));
        assert!(!node.fits(&Resource::new(3, 2)));
    }
}
