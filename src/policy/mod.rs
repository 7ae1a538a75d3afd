//! Fairness policies (C5): pluggable algorithms that turn a cache snapshot into either a
//! per-consumer resource quota (`proportion`) or tentative pod placements (`drf`). Both share
//! one trait so the controller and the name-based registry (`crate::registry`) don't need to
//! know which shape a given policy actually produces.

pub mod drf;
pub mod proportion;

pub use drf::DrfPolicy;
pub use proportion::ProportionPolicy;

use std::collections::HashMap;

use crate::models::{ConsumerInfo, NodeInfo, PodSet};

/// Everything a policy needs to compute an allocation round. `nodes` is owned rather than
/// borrowed so a policy that makes tentative placements (DRF) can debit them in place and hand
/// the mutated map back in its `AllocationOutput`.
#[derive(Debug, Clone, Default)]
pub struct AllocationInput {
    pub consumers: Vec<ConsumerInfo>,
    pub pod_sets: Vec<PodSet>,
    pub nodes: HashMap<String, NodeInfo>,
}

/// A tentative pod→node placement a policy wants the controller to assume and, on tick close,
/// publish as a bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub pod_name: String,
    pub node_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationOutput {
    /// Consumers with `status.deserved` (and, where computed, `allocated`/`used`) filled in.
    /// A placement-only policy like DRF returns its input consumers unchanged.
    pub consumers: Vec<ConsumerInfo>,
    /// Tentative placements made this round, already folded into `nodes`' accepted totals.
    pub placements: Vec<Placement>,
    /// `nodes`, reflecting any tentative debits the policy made.
    pub nodes: HashMap<String, NodeInfo>,
}

pub trait Policy: Send + Sync {
    fn name(&self) -> &str;
    fn allocate(&self, input: AllocationInput) -> AllocationOutput;
}
