//! Data-model entities shared by the cache, the policy plugins, and the session framework.

mod assignment;
mod consumer;
mod job;
mod node;
mod pod;
mod podset;
mod resource;
mod selector;
mod taint;

pub use assignment::Assignment;
pub use consumer::{ConsumerInfo, ConsumerSpec, ConsumerStatus, CONSUMER_PLURAL};
pub use job::{JobInfo, TaskInfo, TaskStatus, TASK_STATUSES};
pub use node::{NodeInfo, NodeSpec};
pub use pod::{PodInfo, PodPhase, PodSpec, QueuedInfo};
pub use podset::PodSet;
pub use resource::Resource;
pub use selector::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorOperator, NodeSelectorRequirement,
    NodeSelectorTerm, PreferredSchedulingTerm, PreferredSchedulingTerms,
};
pub use taint::{Taint, TaintEffect, TaintKey, Toleration, TolerationOperator};
