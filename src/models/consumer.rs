use serde::{Deserialize, Serialize};

use super::Resource;

pub const CONSUMER_PLURAL: &str = "consumers";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerSpec {
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub reserved: Resource,
    #[serde(default)]
    pub request: Resource,
}

/// Computed at session-open time, never read from the source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerStatus {
    pub deserved: Resource,
    pub allocated: Resource,
    pub used: Resource,
    pub preempting: Resource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub namespace: String,
    pub name: String,
    pub spec: ConsumerSpec,
    #[serde(default)]
    pub status: ConsumerStatus,
}

impl ConsumerInfo {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
