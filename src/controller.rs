//! The controller (C8): drives the scheduling tick and publishes its decisions. A tick snapshots
//! the cache, runs the configured actions over an open session, and closes it; binds are assumed
//! into the cache immediately (so the very next tick already sees them, independent of whether the
//! publish round-trip has completed) and queued on a FIFO a separate publication loop drains.
//! A third, independent loop keeps the cache itself in sync with the cluster collaborator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};

use crate::actions::Action;
use crate::cache::Cache;
use crate::cluster_client::{ClusterClient, ClusterEvent};
use crate::models::{Assignment, TaskStatus};
use crate::policy::{AllocationInput, Policy};
use crate::queue::Fifo;
use crate::session::{close_session, open_session, BindDecision, EvictDecision, SessionPlugin};

enum Decision {
    Bind(BindDecision),
    Evict(EvictDecision),
}

/// Fetches every node and pod once and loads them into the cache. Called before either loop
/// starts so the first tick sees a populated snapshot rather than an empty one.
pub async fn sync_cache(cache: &Cache, cluster: &dyn ClusterClient) -> anyhow::Result<()> {
    for node in cluster.list_nodes().await? {
        cache.add_node(node);
    }
    for pod in cluster.list_pods().await? {
        cache.add_pod(pod);
    }
    Ok(())
}

/// Runs until `stop` fires, applying every node/pod event the cluster collaborator observes to
/// the cache. An ill-formed or out-of-order event is dropped (§7 item 1); it never panics.
pub async fn run_informers(cache: Arc<Cache>, cluster: Arc<dyn ClusterClient>, mut stop: watch::Receiver<bool>) {
    let (mut nodes, mut pods) = match tokio::try_join!(cluster.watch_nodes(), cluster.watch_pods()) {
        Ok(streams) => streams,
        Err(err) => {
            log::warn!("informer loop could not start watching the cluster: {err}");
            return;
        }
    };
    let (mut nodes_done, mut pods_done) = (false, false);
    loop {
        tokio::select! {
            event = nodes.recv(), if !nodes_done => {
                match event {
                    Some(ClusterEvent::Put(node)) => cache.update_node(node),
                    Some(ClusterEvent::Delete { name, .. }) => cache.delete_node(&name),
                    None => nodes_done = true,
                }
            }
            event = pods.recv(), if !pods_done => {
                match event {
                    Some(ClusterEvent::Put(pod)) => cache.update_pod(pod),
                    Some(ClusterEvent::Delete { name, .. }) => cache.delete_pod(&name),
                    None => pods_done = true,
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    return;
                }
            }
        }
    }
}

/// Folds a policy's placements into a freshly opened session: the placed node map (reflecting
/// the policy's own tentative debits) replaces the session's raw snapshot nodes, and each placed
/// task moves to `Allocated` with a matching bind decision recorded. A policy that only computes
/// quotas (`proportion`) returns no placements, so this is a no-op beyond adopting `output.nodes`
/// unchanged; the C7 actions that run afterward remain the only source of placements in that case.
fn apply_policy_placements(session: &mut crate::session::Session, output: crate::policy::AllocationOutput) {
    let mut by_pod_name: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
    for (job_uid, job) in &session.job_index {
        for task in job.all_tasks() {
            by_pod_name.insert(task.name.clone(), (job_uid.clone(), task.uid.clone()));
        }
    }

    for placement in &output.placements {
        let Some((job_uid, task_uid)) = by_pod_name.get(&placement.pod_name) else { continue };
        let job = session.job_index.get_mut(job_uid).expect("placed job must still be in the session");
        if !matches!(job.task(task_uid).map(|t| t.status), Some(TaskStatus::Pending)) {
            continue;
        }
        job.update_task_status(task_uid, TaskStatus::Allocated);
        let task = job.task(task_uid).expect("task just updated must exist");
        session.binds.push(BindDecision {
            namespace: task.namespace.clone(),
            name: task.name.clone(),
            task_uid: task_uid.clone(),
            node_name: placement.node_name.clone(),
        });
    }

    session.nodes = output.nodes;
}

/// Owns one tick's worth of machinery: the session plugins and actions it runs, the cache it
/// reads and assumes into, the cluster client it publishes through, and the decision FIFO
/// bridging its two loops.
pub struct Controller {
    cache: Arc<Cache>,
    cluster: Arc<dyn ClusterClient>,
    policy: Arc<dyn Policy>,
    session_plugins: Vec<Box<dyn SessionPlugin>>,
    actions: Vec<Box<dyn Action>>,
    tick_interval: Duration,
    decisions: Mutex<Fifo<Decision>>,
    notify: Notify,
    assignments: mpsc::UnboundedSender<Assignment>,
}

impl Controller {
    pub fn new(
        cache: Arc<Cache>,
        cluster: Arc<dyn ClusterClient>,
        policy: Arc<dyn Policy>,
        session_plugins: Vec<Box<dyn SessionPlugin>>,
        actions: Vec<Box<dyn Action>>,
        tick_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Assignment>) {
        let (assignments, rx) = mpsc::unbounded_channel();
        let controller = Self {
            cache,
            cluster,
            policy,
            session_plugins,
            actions,
            tick_interval,
            decisions: Mutex::new(Fifo::new()),
            notify: Notify::new(),
            assignments,
        };
        (Arc::new(controller), rx)
    }

    /// One tick: snapshot → run the configured C5 policy over it → fold its placements into a
    /// freshly opened session → run every C7 action in order → close session → assume binds into
    /// the cache and enqueue every decision for publication. Drops whatever the prior tick had
    /// queued but not yet published first (reset-before-tick, best-effort). Exposed directly
    /// (alongside `spawn`) for callers that want to drive ticks manually rather than on the
    /// periodic scheduling loop.
    pub fn tick(&self) {
        {
            let mut queue = self.decisions.lock().expect("decision queue mutex poisoned");
            queue.clear();
        }

        let snapshot = self.cache.snapshot();

        let policy_input = AllocationInput {
            consumers: snapshot.consumers.values().cloned().collect(),
            pod_sets: snapshot.pod_sets(),
            nodes: snapshot.nodes.clone(),
        };
        let policy_output = self.policy.allocate(policy_input);
        for consumer in &policy_output.consumers {
            log::debug!(
                "consumer {} deserved={:?} allocated={:?}",
                consumer.key(),
                consumer.status.deserved,
                consumer.status.allocated,
            );
        }

        let mut session = open_session(&snapshot, &self.session_plugins);
        apply_policy_placements(&mut session, policy_output);

        for action in &self.actions {
            action.execute(&mut session);
        }
        let binds = std::mem::take(&mut session.binds);
        let evictions = std::mem::take(&mut session.evictions);
        close_session(session, &self.session_plugins);

        if binds.is_empty() && evictions.is_empty() {
            return;
        }

        let mut queue = self.decisions.lock().expect("decision queue mutex poisoned");
        for bind in binds {
            self.cache.assume_pod(&bind.name, &bind.node_name);
            queue.push(Decision::Bind(bind));
        }
        for evict in evictions {
            queue.push(Decision::Evict(evict));
        }
        drop(queue);
        self.notify.notify_one();
    }

    async fn publish(&self, decision: Decision) {
        match decision {
            Decision::Bind(bind) => match self.cluster.bind(&bind.namespace, &bind.name, &bind.task_uid, &bind.node_name).await {
                Ok(()) => {
                    let _ = self.assignments.send(Assignment::Bind { pod_name: bind.name, node_name: bind.node_name });
                }
                Err(err) => {
                    log::warn!("bind failed for {}/{}: {err}", bind.namespace, bind.name);
                    self.cache.unassume_pod(&bind.name);
                }
            },
            Decision::Evict(evict) => match self.cluster.delete(&evict.namespace, &evict.name).await {
                Ok(()) => {
                    self.cache.delete_pod(&evict.name);
                    let _ = self.assignments.send(Assignment::Evict { pod_name: evict.name });
                }
                Err(err) => {
                    log::warn!("evict failed for {}/{}: {err}", evict.namespace, evict.name);
                }
            },
        }
    }

    /// Drains and publishes every decision currently queued. Exposed for callers driving ticks
    /// manually via `tick`; the spawned publication loop does the equivalent continuously.
    pub async fn publish_pending(&self) {
        loop {
            let next = { self.decisions.lock().expect("decision queue mutex poisoned").pop() };
            match next {
                Some(decision) => self.publish(decision).await,
                None => return,
            }
        }
    }

    async fn run_scheduling_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_publication_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let next = { self.decisions.lock().expect("decision queue mutex poisoned").pop() };
            match next {
                Some(decision) => self.publish(decision).await,
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Spawns the scheduling and publication loops as independent tasks sharing `stop`.
    pub fn spawn(self: &Arc<Self>, stop: watch::Receiver<bool>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let scheduling = Arc::clone(self).run_scheduling_loop(stop.clone());
        let publication = Arc::clone(self).run_publication_loop(stop);
        (tokio::spawn(scheduling), tokio::spawn(publication))
    }
}
