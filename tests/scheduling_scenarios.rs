//! End-to-end coverage through the public API: a cache, a controller wired with real actions, and
//! a stub cluster collaborator. Exercises the controller's assume-before-publish contract and a
//! preemption attempt blocked by the gang floor, both across the full session/action/controller
//! stack rather than at a single component's unit-test boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use batchsched::actions::{Action, Allocate, Preempt};
use batchsched::cache::Cache;
use batchsched::cluster_client::{ClusterClient, ClusterEvent};
use batchsched::controller::Controller;
use batchsched::models::{Assignment, NodeInfo, PodInfo, PodPhase, PodSpec, Resource};
use batchsched::plugins::Registry as PlacementRegistry;
use batchsched::policy::DrfPolicy;

struct StubCluster {
    binds: AtomicUsize,
    evictions: AtomicUsize,
}

impl StubCluster {
    fn new() -> Self {
        Self { binds: AtomicUsize::new(0), evictions: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ClusterClient for StubCluster {
    async fn list_nodes(&self) -> anyhow::Result<Vec<NodeInfo>> {
        Ok(Vec::new())
    }
    async fn list_pods(&self) -> anyhow::Result<Vec<PodInfo>> {
        Ok(Vec::new())
    }
    async fn watch_nodes(&self) -> anyhow::Result<mpsc::UnboundedReceiver<ClusterEvent<NodeInfo>>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }
    async fn watch_pods(&self) -> anyhow::Result<mpsc::UnboundedReceiver<ClusterEvent<PodInfo>>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }
    async fn bind(&self, _namespace: &str, _name: &str, _uid: &str, _node_name: &str) -> anyhow::Result<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn delete(&self, _namespace: &str, _name: &str) -> anyhow::Result<()> {
        self.evictions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn node(name: &str, cpu: u64) -> NodeInfo {
    NodeInfo { name: name.to_string(), allocatable: Resource::new(cpu, 0), ..Default::default() }
}

fn pending_pod(name: &str, owner: &str, cpu: u64, min_available: u64) -> PodInfo {
    PodInfo {
        uid: name.to_string(),
        name: name.to_string(),
        owner_uid: owner.to_string(),
        namespace: "ns".to_string(),
        phase: PodPhase::Pending,
        min_available,
        spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
        ..Default::default()
    }
}

fn running_pod(name: &str, owner: &str, cpu: u64, min_available: u64, node_name: &str) -> PodInfo {
    PodInfo {
        uid: name.to_string(),
        name: name.to_string(),
        owner_uid: owner.to_string(),
        namespace: "ns".to_string(),
        phase: PodPhase::Running,
        min_available,
        scheduled: Some(node_name.to_string()),
        spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
        ..Default::default()
    }
}

#[tokio::test]
async fn assume_survives_tick_boundary() {
    let cache = Arc::new(Cache::new());
    cache.add_node(node("n1", 2));
    cache.add_pod(pending_pod("p1", "job-1", 1, 1));

    let cluster: Arc<dyn ClusterClient> = Arc::new(StubCluster::new());
    let actions: Vec<Box<dyn Action>> = vec![Box::new(Allocate::new(Arc::new(PlacementRegistry::default())))];
    let (controller, mut assignments) = Controller::new(cache.clone(), cluster, Arc::new(DrfPolicy::new()), Vec::new(), actions, Duration::from_secs(1));

    controller.tick();

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.pod("p1").unwrap().scheduled.as_deref(), Some("n1"));

    controller.publish_pending().await;
    let assignment = assignments.recv().await.expect("publish should emit the bind assignment");
    assert_eq!(assignment, Assignment::Bind { pod_name: "p1".to_string(), node_name: "n1".to_string() });
}

#[tokio::test]
async fn preemption_forbidden_by_gang_floor_leaves_pending_task_unplaced() {
    let cache = Arc::new(Cache::new());
    cache.add_node(node("n1", 1));
    cache.add_pod(running_pod("v1", "low", 1, 1, "n1"));
    cache.add_pod(pending_pod("p1", "high", 1, 1));

    let cluster: Arc<dyn ClusterClient> = Arc::new(StubCluster::new());
    let actions: Vec<Box<dyn Action>> = vec![Box::new(Preempt), Box::new(Allocate::new(Arc::new(PlacementRegistry::default())))];
    let (controller, mut assignments) = Controller::new(cache.clone(), cluster, Arc::new(DrfPolicy::new()), Vec::new(), actions, Duration::from_secs(1));

    controller.tick();
    controller.publish_pending().await;

    assert!(assignments.try_recv().is_err());
    let snapshot = cache.snapshot();
    assert!(snapshot.pod("p1").unwrap().scheduled.is_none());
    assert!(snapshot.pod("v1").is_some());
}
