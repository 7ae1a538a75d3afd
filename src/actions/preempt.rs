//! The Preempt action (§4.5): for a pending task that doesn't fit anywhere as-is, looks for a
//! node where evicting lower-priority tasks would free enough room, subject to every registered
//! `PreemptableFn` and to each victim job's own gang floor (`MinAvailable - 1`). Preempt never
//! binds the preemptor itself — it only marks victims Releasing; a later Allocate pass (or the
//! next tick) places the freed-up task.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::models::{JobInfo, Resource, TaskStatus};
use crate::session::{EvictDecision, Session};

use super::Action;

pub struct Preempt;

impl Action for Preempt {
    fn name(&self) -> &str {
        "preempt"
    }

    fn execute(&self, session: &mut Session) {
        let job_order: Vec<String> = session.jobs_in_order().into_iter().map(|j| j.uid.clone()).collect();
        let mut evicted: HashSet<String> = HashSet::new();

        for preemptor_uid in &job_order {
            let Some(task_uid) = session
                .job_index
                .get(preemptor_uid)
                .and_then(|j| j.tasks_with_status(TaskStatus::Pending).first().map(|t| t.uid.clone()))
            else {
                continue;
            };

            let request = session.job_index[preemptor_uid].task(&task_uid).expect("task uid just looked up must exist").request.clone();

            let mut node_names: Vec<String> = session.nodes.keys().cloned().collect();
            node_names.sort();

            for node_name in &node_names {
                let idle = session.nodes[node_name].current_idle();
                if request.less_equal(&idle) {
                    continue;
                }
                let deficit = request.sub(&idle);

                let Some(selected) = select_victims(session, preemptor_uid, node_name, &deficit, &evicted) else {
                    continue;
                };

                for (job_uid, victim_uid, victim_request) in &selected {
                    session.job_index.get_mut(job_uid).expect("victim job must exist").update_task_status(victim_uid, TaskStatus::Releasing);
                    let job = &session.job_index[job_uid];
                    let task = job.task(victim_uid).expect("victim task must exist");
                    session.evictions.push(EvictDecision {
                        namespace: task.namespace.clone(),
                        name: task.name.clone(),
                        task_uid: victim_uid.clone(),
                    });
                    let node = session.nodes.get_mut(node_name).expect("node just inspected must exist");
                    node.requested = node.requested.sub(victim_request);
                    evicted.insert(victim_uid.clone());
                }
                break;
            }
        }
    }
}

/// Greedily selects victims on `node_name`, lowest-priority (latest in job order) first, until
/// their combined request covers `deficit`. A candidate is skipped if it fails `PreemptableFn` or
/// if evicting it (plus any already-selected sibling) would drop its job below `MinAvailable - 1`.
/// Returns `None` if the node's full candidate set still can't cover the deficit.
fn select_victims(
    session: &Session,
    preemptor_uid: &str,
    node_name: &str,
    deficit: &Resource,
    already_evicted: &HashSet<String>,
) -> Option<Vec<(String, String, Resource)>> {
    let preemptor = &session.job_index[preemptor_uid];

    let mut candidates: Vec<(String, String)> = Vec::new();
    for (job_uid, job) in &session.job_index {
        if job_uid == preemptor_uid {
            continue;
        }
        for status in [TaskStatus::Running, TaskStatus::Bound, TaskStatus::Allocated] {
            for t in job.tasks_with_status(status) {
                if t.node_name.as_deref() == Some(node_name) && !already_evicted.contains(&t.uid) {
                    candidates.push((job_uid.clone(), t.uid.clone()));
                }
            }
        }
    }
    candidates.sort_by(|a, b| {
        session
            .job_order(&session.job_index[&a.0], &session.job_index[&b.0])
            .reverse()
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut freed = Resource::zero();
    let mut selected: Vec<(String, String, Resource)> = Vec::new();
    let mut picked_from: HashMap<String, usize> = HashMap::new();

    for (job_uid, task_uid) in candidates {
        if deficit.less_equal(&freed) {
            break;
        }
        let victim_job = &session.job_index[&job_uid];
        if !session.preemptable(preemptor, victim_job) {
            continue;
        }
        if !survives_eviction(victim_job, *picked_from.get(&job_uid).unwrap_or(&0)) {
            continue;
        }
        let task = victim_job.task(&task_uid).expect("candidate task must exist");
        freed = freed.add(&task.request);
        selected.push((job_uid.clone(), task_uid, task.request.clone()));
        *picked_from.entry(job_uid).or_insert(0) += 1;
    }

    if deficit.less_equal(&freed) {
        Some(selected)
    } else {
        None
    }
}

/// Whether evicting one more task (on top of `already_picked` from the same job) still leaves the
/// job at or above `MinAvailable - 1`.
fn survives_eviction(job: &JobInfo, already_picked: usize) -> bool {
    let floor = job.min_available.saturating_sub(1) as i64;
    let remaining = job.occupied_count() as i64 - already_picked as i64 - 1;
    remaining >= floor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Snapshot;
    use crate::models::{NodeInfo, PodInfo, PodPhase, PodSet, PodSpec};
    use crate::session::open_session;

    fn node(name: &str, cpu: u64) -> NodeInfo {
        NodeInfo { name: name.to_string(), allocatable: Resource::new(cpu, 0), ..Default::default() }
    }

    fn running_pod(name: &str, owner: &str, cpu: u64, node_name: &str) -> PodInfo {
        PodInfo {
            uid: name.to_string(),
            name: name.to_string(),
            owner_uid: owner.to_string(),
            namespace: "ns".to_string(),
            phase: PodPhase::Running,
            scheduled: Some(node_name.to_string()),
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    fn pending_pod(name: &str, owner: &str, cpu: u64) -> PodInfo {
        PodInfo {
            uid: name.to_string(),
            name: name.to_string(),
            owner_uid: owner.to_string(),
            namespace: "ns".to_string(),
            phase: PodPhase::Pending,
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn evicts_a_fully_preemptable_victim_to_make_room() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));

        let mut low = PodSet::new("low", "ns", "low", 1);
        low.add_pod(running_pod("v1", "low", 1, "n1"));
        snapshot.pods.insert("v1".to_string(), low.running[0].clone());

        let mut high = PodSet::new("high", "ns", "high", 1);
        high.add_pod(pending_pod("p1", "high", 1));
        snapshot.pods.insert("p1".to_string(), high.pending[0].clone());

        let mut session = open_session(&snapshot, &[]);
        session.add_preemptable_fn(Box::new(|_preemptor, _preemptee| true));

        Preempt.execute(&mut session);

        assert_eq!(session.evictions.len(), 1);
        assert_eq!(session.evictions[0].task_uid, "v1");
        assert!(session.nodes["n1"].requested.is_zero());
    }

    #[test]
    fn gang_floor_blocks_eviction_of_minimum_running_job() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));

        let mut low = PodSet::new("low", "ns", "low", 1);
        low.add_pod(running_pod("v1", "low", 1, "n1"));
        snapshot.pods.insert("v1".to_string(), low.running[0].clone());

        let mut high = PodSet::new("high", "ns", "high", 1);
        high.add_pod(pending_pod("p1", "high", 1));
        snapshot.pods.insert("p1".to_string(), high.pending[0].clone());

        let mut session = open_session(&snapshot, &[]);
        session.add_preemptable_fn(Box::new(|_preemptor, preemptee: &JobInfo| preemptee.min_available > 1));

        Preempt.execute(&mut session);

        assert!(session.evictions.is_empty());
    }

    #[test]
    fn preemptable_fn_returning_false_blocks_eviction() {
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert("n1".to_string(), node("n1", 1));

        let mut low = PodSet::new("low", "ns", "low", 1);
        low.add_pod(running_pod("v1", "low", 1, "n1"));
        snapshot.pods.insert("v1".to_string(), low.running[0].clone());

        let mut high = PodSet::new("high", "ns", "high", 1);
        high.add_pod(pending_pod("p1", "high", 1));
        snapshot.pods.insert("p1".to_string(), high.pending[0].clone());

        let mut session = open_session(&snapshot, &[]);
        session.add_preemptable_fn(Box::new(|_preemptor, _preemptee| false));

        Preempt.execute(&mut session);

        assert!(session.evictions.is_empty());
    }
}
