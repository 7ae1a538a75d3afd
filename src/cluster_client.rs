//! The cluster collaborator (C10): the scheduler's only window onto the source of truth. A
//! `ClusterClient` lists and watches nodes/pods and publishes bind/delete decisions; everything
//! else in this crate works against the in-memory cache these calls keep in sync.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, WatchOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::models::{NodeInfo, NodeSpec, PodInfo, PodPhase, PodSpec, QueuedInfo, Resource};

const NODE_PREFIX: &str = "/registry/nodes/";
const POD_PREFIX: &str = "/registry/pods/";

/// A put or delete observed on a watched prefix.
#[derive(Debug, Clone)]
pub enum ClusterEvent<T> {
    Put(T),
    Delete { namespace: String, name: String },
}

/// The scheduler's view of the external cluster: list/watch for the informer loop, bind/delete
/// for the publisher. Implementations are free to model "bind" however their backing store
/// represents a scheduling decision; etcd's is a read-modify-write of the pod object.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;
    async fn list_pods(&self) -> Result<Vec<PodInfo>>;
    async fn watch_nodes(&self) -> Result<UnboundedReceiver<ClusterEvent<NodeInfo>>>;
    async fn watch_pods(&self) -> Result<UnboundedReceiver<ClusterEvent<PodInfo>>>;
    async fn bind(&self, namespace: &str, name: &str, uid: &str, node_name: &str) -> Result<()>;
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, rename = "ownerReferences")]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OwnerReference {
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireResourceList {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireContainerResources {
    pub requests: Option<WireResourceList>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: Option<WireContainerResources>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WirePodSpec {
    #[serde(default)]
    pub containers: Vec<WireContainer>,
    #[serde(default, rename = "nodeName")]
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WirePodStatus {
    #[serde(default)]
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePod {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WirePodSpec,
    #[serde(default)]
    pub status: WirePodStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireNodeSpec {
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireNodeStatus {
    #[serde(default)]
    pub capacity: HashMap<String, String>,
    #[serde(default)]
    pub allocatable: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireNode {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WireNodeSpec,
    #[serde(default)]
    pub status: WireNodeStatus,
}

fn parse_cpu(value: &str) -> u64 {
    if let Some(milli) = value.strip_suffix('m') {
        milli.parse().unwrap_or(0)
    } else {
        (value.parse::<f64>().unwrap_or(0.0) * 1000.0) as u64
    }
}

fn parse_memory(value: &str) -> u64 {
    let value = value.to_lowercase();
    let (digits, multiplier) = if let Some(d) = value.strip_suffix("ki") {
        (d, 1024)
    } else if let Some(d) = value.strip_suffix("mi") {
        (d, 1024 * 1024)
    } else if let Some(d) = value.strip_suffix("gi") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = value.strip_suffix('k') {
        (d, 1_000)
    } else if let Some(d) = value.strip_suffix('m') {
        (d, 1_000_000)
    } else if let Some(d) = value.strip_suffix('g') {
        (d, 1_000_000_000)
    } else {
        (value.as_str(), 1)
    };
    digits.parse::<u64>().unwrap_or(0) * multiplier
}

fn pod_phase(phase: &str) -> PodPhase {
    match phase {
        "Running" => PodPhase::Running,
        "Succeeded" => PodPhase::Succeeded,
        "Failed" => PodPhase::Failed,
        "Pending" => PodPhase::Pending,
        _ => PodPhase::Unknown,
    }
}

fn wire_pod_to_pod_info(wire: WirePod) -> PodInfo {
    let mut resources = Resource::zero();
    for container in &wire.spec.containers {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            let cpu = requests.cpu.as_deref().map(parse_cpu).unwrap_or(0);
            let memory = requests.memory.as_deref().map(parse_memory).unwrap_or(0);
            resources = resources.add(&Resource::new(cpu, memory));
        }
    }
    let owner_uid = wire.metadata.owner_references.first().map(|o| o.uid.clone()).unwrap_or_default();
    PodInfo {
        uid: wire.metadata.uid,
        owner_uid,
        namespace: wire.metadata.namespace,
        name: wire.metadata.name,
        phase: pod_phase(&wire.status.phase),
        spec: PodSpec {
            resources,
            node_name: wire.spec.node_name.clone(),
            ..Default::default()
        },
        queued_info: QueuedInfo::default(),
        scheduled: wire.spec.node_name,
        min_available: 1,
    }
}

fn wire_node_to_node_info(wire: WireNode) -> NodeInfo {
    let cpu = wire.status.allocatable.get("cpu").map(String::as_str).map(parse_cpu).unwrap_or(0);
    let memory = wire.status.allocatable.get("memory").map(String::as_str).map(parse_memory).unwrap_or(0);
    NodeInfo {
        name: wire.metadata.name,
        labels: wire.metadata.labels,
        spec: NodeSpec { unschedulable: wire.spec.unschedulable, taints: Vec::new() },
        allocatable: Resource::new(cpu, memory),
        requested: Resource::zero(),
        unaccepted: Resource::zero(),
        pods: Default::default(),
    }
}

fn key_last_segment(key: &[u8]) -> String {
    String::from_utf8_lossy(key).rsplit('/').next().unwrap_or_default().to_string()
}

/// Backs `ClusterClient` with etcd, matching the reference watch/list transport: node and pod
/// objects are `serde_yaml`-encoded values under the `/registry/nodes/` and `/registry/pods/`
/// prefixes.
pub struct EtcdClusterClient {
    client: Client,
}

impl EtcdClusterClient {
    pub async fn connect(endpoints: &[&str]) -> Result<Self> {
        let client = Client::connect(endpoints, None).await.context("connecting to etcd")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterClient for EtcdClusterClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut client = self.client.clone();
        let resp = client.get(NODE_PREFIX, Some(GetOptions::new().with_prefix())).await?;
        let mut nodes = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let wire: WireNode = serde_yaml::from_slice(kv.value()).context("decoding node object")?;
            nodes.push(wire_node_to_node_info(wire));
        }
        Ok(nodes)
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        let mut client = self.client.clone();
        let resp = client.get(POD_PREFIX, Some(GetOptions::new().with_prefix())).await?;
        let mut pods = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let wire: WirePod = serde_yaml::from_slice(kv.value()).context("decoding pod object")?;
            pods.push(wire_pod_to_pod_info(wire));
        }
        Ok(pods)
    }

    async fn watch_nodes(&self) -> Result<UnboundedReceiver<ClusterEvent<NodeInfo>>> {
        let mut client = self.client.clone();
        let (_, mut stream) = client
            .watch(NODE_PREFIX, Some(WatchOptions::new().with_prefix()))
            .await
            .context("watching node prefix")?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let sent = match event.event_type() {
                        EventType::Put => match serde_yaml::from_slice::<WireNode>(kv.value()) {
                            Ok(wire) => tx.send(ClusterEvent::Put(wire_node_to_node_info(wire))),
                            Err(err) => {
                                log::warn!("dropping malformed node event: {err}");
                                continue;
                            }
                        },
                        EventType::Delete => tx.send(ClusterEvent::Delete {
                            namespace: String::new(),
                            name: key_last_segment(kv.key()),
                        }),
                    };
                    if sent.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn watch_pods(&self) -> Result<UnboundedReceiver<ClusterEvent<PodInfo>>> {
        let mut client = self.client.clone();
        let (_, mut stream) = client
            .watch(POD_PREFIX, Some(WatchOptions::new().with_prefix()))
            .await
            .context("watching pod prefix")?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let sent = match event.event_type() {
                        EventType::Put => match serde_yaml::from_slice::<WirePod>(kv.value()) {
                            Ok(wire) => tx.send(ClusterEvent::Put(wire_pod_to_pod_info(wire))),
                            Err(err) => {
                                log::warn!("dropping malformed pod event: {err}");
                                continue;
                            }
                        },
                        EventType::Delete => {
                            let name = key_last_segment(kv.key());
                            tx.send(ClusterEvent::Delete { namespace: String::new(), name })
                        }
                    };
                    if sent.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn bind(&self, namespace: &str, name: &str, uid: &str, node_name: &str) -> Result<()> {
        let mut client = self.client.clone();
        let key = format!("{POD_PREFIX}{name}");
        let resp = client.get(key.as_str(), None).await?;
        let Some(kv) = resp.kvs().first() else {
            anyhow::bail!("bind failed: pod {namespace}/{name} (uid {uid}) not found in cluster store");
        };
        let mut wire: WirePod = serde_yaml::from_slice(kv.value()).context("decoding pod object for bind")?;
        if wire.metadata.uid != uid {
            anyhow::bail!("bind failed: pod {namespace}/{name} uid mismatch (expected {uid}, found {})", wire.metadata.uid);
        }
        wire.spec.node_name = Some(node_name.to_string());
        let encoded = serde_yaml::to_string(&wire).context("encoding pod object for bind")?;
        client.put(key, encoded, None).await?;
        Ok(())
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut client = self.client.clone();
        let key = format!("{POD_PREFIX}{name}");
        client.delete(key, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_handles_millicpu_and_whole_cores() {
        assert_eq!(parse_cpu("500m"), 500);
        assert_eq!(parse_cpu("2"), 2000);
    }

    #[test]
    fn parse_memory_handles_binary_and_decimal_suffixes() {
        assert_eq!(parse_memory("1Ki"), 1024);
        assert_eq!(parse_memory("2Gi"), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory("1000"), 1000);
    }

    #[test]
    fn wire_pod_sums_container_requests_and_reads_owner_uid() {
        let wire = WirePod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "ns".to_string(),
                uid: "u1".to_string(),
                labels: HashMap::new(),
                owner_references: vec![OwnerReference { uid: "job-1".to_string() }],
            },
            spec: WirePodSpec {
                containers: vec![WireContainer {
                    name: "c1".to_string(),
                    resources: Some(WireContainerResources {
                        requests: Some(WireResourceList { cpu: Some("500m".to_string()), memory: Some("1Gi".to_string()) }),
                    }),
                }],
                node_name: None,
            },
            status: WirePodStatus { phase: "Pending".to_string() },
        };
        let pod = wire_pod_to_pod_info(wire);
        assert_eq!(pod.owner_uid, "job-1");
        assert_eq!(pod.spec.resources, Resource::new(500, 1024 * 1024 * 1024));
        assert_eq!(pod.phase, PodPhase::Pending);
    }

    #[test]
    fn wire_node_reads_allocatable() {
        let wire = WireNode {
            api_version: "v1".to_string(),
            kind: "Node".to_string(),
            metadata: ObjectMeta { name: "n1".to_string(), ..Default::default() },
            spec: WireNodeSpec::default(),
            status: WireNodeStatus {
                capacity: HashMap::new(),
                allocatable: HashMap::from([("cpu".to_string(), "4".to_string()), ("memory".to_string(), "8Gi".to_string())]),
            },
        };
        let node = wire_node_to_node_info(wire);
        assert_eq!(node.allocatable, Resource::new(4000, 8 * 1024 * 1024 * 1024));
    }
}
