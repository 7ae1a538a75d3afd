//! The Allocate action (§4.5): iterates ready-but-pending jobs in `JobOrderFn` order, placing
//! tasks onto the best-scoring feasible node per the node-placement plugins (C9). A job that
//! hasn't yet reached `MinAvailable` is only ever placed all-or-nothing this tick — its tentative
//! picks are rolled back unless every one of them lands, so the gang invariant (§4.3) holds even
//! when this action is the only placement engine running (e.g. under the `proportion` policy,
//! which computes quotas rather than placements). A job already at or beyond its gang threshold
//! places its remaining backlog opportunistically, one task at a time, since those placements
//! only ever raise it further above the floor. Placed tasks move to `Allocated` in the session and
//! a bind decision is recorded; the controller publishes it and calls `Cache::assume_pod` on tick
//! close.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cycle_state::CycleState;
use crate::models::{NodeInfo, PodInfo, PodSpec, Resource, TaskStatus};
use crate::plugins::{Code, Registry};
use crate::session::{BindDecision, Session};

use super::Action;

pub struct Allocate {
    registry: Arc<Registry>,
}

impl Allocate {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Places pending tasks for `job_uid` one at a time until none more fit; safe to call only
    /// once the job is already at or above `MinAvailable`, since each placement here can only
    /// raise it further.
    fn place_opportunistically(&self, session: &mut Session, job_uid: &str) {
        loop {
            let Some(task_uid) = session
                .job_index
                .get(job_uid)
                .and_then(|job| job.tasks_with_status(TaskStatus::Pending).first().map(|t| t.uid.clone()))
            else {
                return;
            };
            if !self.place_one(session, job_uid, &task_uid) {
                return;
            }
        }
    }

    /// Attempts to place `needed` of the job's pending tasks, atomically. Works against a scratch
    /// copy of the node map so a shortfall leaves `session.nodes` and every task's status
    /// untouched — the all-or-nothing rule the §4.3 gang invariant requires.
    fn place_gang(&self, session: &mut Session, job_uid: &str, needed: usize) {
        let pending_uids: Vec<String> = session.job_index[job_uid]
            .tasks_with_status(TaskStatus::Pending)
            .iter()
            .map(|t| t.uid.clone())
            .collect();
        if pending_uids.len() < needed {
            return;
        }

        let mut scratch_nodes: HashMap<String, NodeInfo> = session.nodes.clone();
        let mut placed: Vec<(String, String, Resource)> = Vec::new();

        for task_uid in &pending_uids {
            if placed.len() >= needed {
                break;
            }
            let (namespace, name, request) = {
                let task = session.job_index[job_uid].task(task_uid).expect("pending task uid just listed must exist");
                (task.namespace.clone(), task.name.clone(), task.request.clone())
            };
            let pod = PodInfo {
                namespace,
                name,
                spec: PodSpec { resources: request.clone(), ..Default::default() },
                ..Default::default()
            };

            let mut nodes: Vec<&NodeInfo> = scratch_nodes.values().collect();
            nodes.sort_by(|a, b| a.name.cmp(&b.name));
            let Some(node_name) = select_node(&pod, &nodes, &self.registry) else { continue };

            let node = scratch_nodes.get_mut(&node_name).expect("selected node must exist in scratch map");
            node.requested = node.requested.add(&request);
            placed.push((task_uid.clone(), node_name, request));
        }

        if placed.len() != needed {
            // Rolling back is implicit: `scratch_nodes` and its tentative debits are simply
            // discarded, and no task status or bind decision was ever recorded above.
            return;
        }

        session.nodes = scratch_nodes;
        for (task_uid, node_name, _) in placed {
            let (namespace, name) = {
                let task = session.job_index[job_uid].task(&task_uid).expect("placed task must exist");
                (task.namespace.clone(), task.name.clone())
            };
            session.job_index.get_mut(job_uid).expect("job must still exist").update_task_status(&task_uid, TaskStatus::Allocated);
            session.binds.push(BindDecision { namespace, name, task_uid, node_name });
        }
    }

    /// Selects a feasible node for one task in `session.nodes` directly and commits immediately.
    /// Returns whether a placement was made.
    fn place_one(&self, session: &mut Session, job_uid: &str, task_uid: &str) -> bool {
        let (namespace, name, request) = {
            let task = session.job_index[job_uid].task(task_uid).expect("task uid just looked up must exist");
            (task.namespace.clone(), task.name.clone(), task.request.clone())
        };

        let pod = PodInfo {
            namespace: namespace.clone(),
            name: name.clone(),
            spec: PodSpec { resources: request.clone(), ..Default::default() },
            ..Default::default()
        };

        let mut nodes: Vec<&NodeInfo> = session.nodes.values().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        let Some(node_name) = select_node(&pod, &nodes, &self.registry) else {
            return false;
        };

        let node = session.nodes.get_mut(&node_name).expect("selected node must exist in session");
        node.requested = node.requested.add(&request);

        session.job_index.get_mut(job_uid).expect("job uid must still exist").update_task_status(task_uid, TaskStatus::Allocated);
        session.binds.push(BindDecision { namespace, name, task_uid: task_uid.to_string(), node_name });
        true
    }
}

impl Action for Allocate {
    fn name(&self) -> &str {
        "allocate"
    }

    fn execute(&self, session: &mut Session) {
        let job_uids: Vec<String> = session.jobs_in_order().into_iter().map(|j| j.uid.clone()).collect();

        for job_uid in job_uids {
            let needed = {
                let job = &session.job_index[&job_uid];
                (job.min_available as usize).saturating_sub(job.occupied_count())
            };

            if needed == 0 {
                self.place_opportunistically(session, &job_uid);
            } else {
                self.place_gang(session, &job_uid, needed);
            }
        }
    }
}

/// Runs the configured filter and score plugins to pick the best feasible node for `pod`, falling
/// back to the first node in the (already node-name-sorted) candidate list if scoring can't run.
fn select_node(pod: &PodInfo, nodes: &[&NodeInfo], registry: &Registry) -> Option<String> {
    let mut state = CycleState::default();

    for plugin in &registry.pre_filter {
        let (_, status) = plugin.pre_filter(&mut state, pod, nodes.iter().map(|n| (*n).clone()).collect());
        if !matches!(status.code, Code::Success | Code::Skip) {
            return None;
        }
    }

    let mut feasible: Vec<&NodeInfo> = Vec::new();
    'nodes: for node in nodes {
        for plugin in &registry.filter {
            let status = plugin.filter(&mut state, pod, (*node).clone());
            if status.code != Code::Success {
                continue 'nodes;
            }
        }
        feasible.push(node);
    }
    if feasible.is_empty() {
        return None;
    }

    for plugin in &registry.pre_score {
        let status = plugin.pre_score(&mut state, pod, feasible.iter().map(|n| (*n).clone()).collect());
        if !matches!(status.code, Code::Success | Code::Skip) {
            return Some(feasible[0].name.clone());
        }
    }

    let mut totals: std::collections::HashMap<String, i64> =
        feasible.iter().map(|n| (n.name.clone(), 0)).collect();
    for plugin in &registry.score {
        let mut scores: Vec<i64> = Vec::with_capacity(feasible.len());
        for node in &feasible {
            let (score, status) = plugin.score(&mut state, pod, (*node).clone());
            scores.push(if status.code == Code::Success { score } else { 0 });
        }
        let _ = plugin.score_extension().normalize_score(&state, pod, &mut scores);
        for (node, score) in feasible.iter().zip(scores.iter()) {
            *totals.get_mut(&node.name).expect("every feasible node has a totals entry") += score;
        }
    }

    feasible.sort_by(|a, b| totals[&b.name].cmp(&totals[&a.name]).then_with(|| a.name.cmp(&b.name)));
    feasible.first().map(|n| n.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Snapshot;
    use crate::models::{PodInfo as ModelPodInfo, PodPhase, Resource};
    use crate::session::open_session;

    fn node(name: &str, cpu: u64) -> NodeInfo {
        NodeInfo { name: name.to_string(), allocatable: Resource::new(cpu, 0), ..Default::default() }
    }

    fn pod(name: &str, cpu: u64) -> ModelPodInfo {
        ModelPodInfo {
            name: name.to_string(),
            namespace: "ns".to_string(),
            phase: PodPhase::Pending,
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn places_one_pending_pod_on_the_only_feasible_node() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 2));
        snapshot.pods.insert("p1".to_string(), pod("p1", 1));

        let mut session = open_session(&snapshot, &[]);
        let allocate = Allocate::new(Arc::new(Registry::default()));
        allocate.execute(&mut session);

        assert_eq!(session.binds.len(), 1);
        assert_eq!(session.binds[0].node_name, "n1");
        assert_eq!(session.nodes["n1"].requested, Resource::new(1, 0));
    }

    #[test]
    fn pod_that_fits_nowhere_is_left_pending() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));
        snapshot.pods.insert("p1".to_string(), pod("p1", 5));

        let mut session = open_session(&snapshot, &[]);
        let allocate = Allocate::new(Arc::new(Registry::default()));
        allocate.execute(&mut session);

        assert!(session.binds.is_empty());
    }

    fn gang_pod(name: &str, owner: &str, cpu: u64, min_available: u64) -> ModelPodInfo {
        ModelPodInfo {
            name: name.to_string(),
            namespace: "ns".to_string(),
            owner_uid: owner.to_string(),
            phase: PodPhase::Pending,
            min_available,
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn gang_with_insufficient_capacity_places_nothing() {
        // job needs 3, only 2 nodes have room: must not place a partial gang.
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));
        snapshot.nodes.insert("n2".to_string(), node("n2", 1));
        snapshot.pods.insert("p1".to_string(), gang_pod("p1", "job-1", 1, 3));
        snapshot.pods.insert("p2".to_string(), gang_pod("p2", "job-1", 1, 3));
        snapshot.pods.insert("p3".to_string(), gang_pod("p3", "job-1", 1, 3));

        let mut session = open_session(&snapshot, &[]);
        let allocate = Allocate::new(Arc::new(Registry::default()));
        allocate.execute(&mut session);

        assert!(session.binds.is_empty(), "a short gang must leave every node untouched");
        assert!(session.nodes["n1"].requested.is_zero());
        assert!(session.nodes["n2"].requested.is_zero());
    }

    #[test]
    fn gang_with_sufficient_capacity_places_every_task_at_once() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));
        snapshot.nodes.insert("n2".to_string(), node("n2", 1));
        snapshot.nodes.insert("n3".to_string(), node("n3", 1));
        snapshot.pods.insert("p1".to_string(), gang_pod("p1", "job-1", 1, 3));
        snapshot.pods.insert("p2".to_string(), gang_pod("p2", "job-1", 1, 3));
        snapshot.pods.insert("p3".to_string(), gang_pod("p3", "job-1", 1, 3));

        let mut session = open_session(&snapshot, &[]);
        let allocate = Allocate::new(Arc::new(Registry::default()));
        allocate.execute(&mut session);

        assert_eq!(session.binds.len(), 3);
    }

    #[test]
    fn job_already_at_min_available_places_remaining_backlog_one_at_a_time() {
        // a running pod already satisfies min_available=1; the second pending pod should still
        // place opportunistically rather than being treated as a fresh gang.
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 2));
        snapshot
            .pods
            .insert("p1".to_string(), ModelPodInfo { phase: PodPhase::Running, ..gang_pod("p1", "job-1", 1, 1) });
        snapshot.pods.insert("p2".to_string(), gang_pod("p2", "job-1", 1, 1));

        let mut session = open_session(&snapshot, &[]);
        let allocate = Allocate::new(Arc::new(Registry::default()));
        allocate.execute(&mut session);

        assert_eq!(session.binds.len(), 1);
        assert_eq!(session.binds[0].name, "p2");
    }
}
