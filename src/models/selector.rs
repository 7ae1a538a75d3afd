use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeSelectorOperator {
    NodeSelectorOpIn,
    NodeSelectorOpNotIn,
    NodeSelectorOpExists,
    NodeSelectorOpDoesNotExist,
    NodeSelectorOpGt,
    NodeSelectorOpLt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: NodeSelectorOperator,
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            NodeSelectorOperator::NodeSelectorOpIn => {
                matches!(value, Some(v) if self.values.contains(v))
            }
            NodeSelectorOperator::NodeSelectorOpNotIn => {
                !matches!(value, Some(v) if self.values.contains(v))
            }
            NodeSelectorOperator::NodeSelectorOpExists => value.is_some(),
            NodeSelectorOperator::NodeSelectorOpDoesNotExist => value.is_none(),
            NodeSelectorOperator::NodeSelectorOpGt => {
                compare_numeric(value, &self.values, |a, b| a > b)
            }
            NodeSelectorOperator::NodeSelectorOpLt => {
                compare_numeric(value, &self.values, |a, b| a < b)
            }
        }
    }
}

fn compare_numeric(value: Option<&String>, values: &[String], cmp: impl Fn(i64, i64) -> bool) -> bool {
    let (Some(value), Some(bound)) = (value, values.first()) else {
        return false;
    };
    let (Ok(value), Ok(bound)) = (value.parse::<i64>(), bound.parse::<i64>()) else {
        return false;
    };
    cmp(value, bound)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelectorTerm {
    pub match_expressions: Vec<NodeSelectorRequirement>,
}

/// Matches a node's labels. An empty selector (no terms) matches everything — the absence of a
/// selector is not a constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelector {
    pub terms: Vec<NodeSelectorTerm>,
}

impl NodeSelector {
    pub fn matches(&self, node: &super::NodeInfo) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        self.terms
            .iter()
            .any(|term| term.match_expressions.iter().all(|req| req.matches(&node.labels)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferredSchedulingTerm {
    pub weight: i64,
    pub match_label: NodeSelectorRequirement,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferredSchedulingTerms {
    pub terms: Vec<PreferredSchedulingTerm>,
}

impl PreferredSchedulingTerms {
    pub fn score(&self, node: &super::NodeInfo) -> i64 {
        self.terms
            .iter()
            .filter(|term| term.match_label.matches(&node.labels))
            .map(|term| term.weight)
            .sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeAffinity {
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
    pub preferred_during_scheduling_ignored_during_execution: Option<PreferredSchedulingTerms>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Affinity {
    pub node_affinity: Option<NodeAffinity>,
}
