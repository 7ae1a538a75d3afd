//! Dominant Resource Fairness with gang atomicity (§4.3). Each PodSet is tried, in dictionary
//! (namespace, name) order, for its MinAvailable pods first — all-or-nothing — then admitted
//! PodSets compete one pod at a time in a priority queue keyed by dominant share, lowest first.

use std::collections::HashMap;

use crate::models::{NodeInfo, PodInfo, PodSet, Resource};
use crate::plugins::node_affinity::matches_pod;
use crate::queue::{DictionaryQueue, PriorityQueue};

use super::{AllocationInput, AllocationOutput, Placement, Policy};

#[derive(Debug, Clone, Default)]
pub struct DrfPolicy;

impl DrfPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for DrfPolicy {
    fn name(&self) -> &str {
        "drf"
    }

    fn allocate(&self, input: AllocationInput) -> AllocationOutput {
        let AllocationInput { consumers, pod_sets, mut nodes } = input;

        let total: Resource = nodes.values().fold(Resource::zero(), |acc, n| acc.add(&n.allocatable));
        let mut placements = Vec::new();

        let mut dict = DictionaryQueue::from_sorted_by_key(pod_sets, |set| {
            let (ns, name) = set.dictionary_key();
            (ns.to_string(), name.to_string())
        });
        let mut admitted: Vec<PodSet> = Vec::new();

        while let Some(mut set) = dict.pop() {
            let matching: Vec<String> = matching_node_names(&set, &nodes);
            let needed = set.needed();
            if needed == 0 {
                // Already at or above MinAvailable from running pods alone; nothing to admit
                // this tick via the gang pass, but it still competes in the DRF pass below if
                // it has pending work.
                admitted.push(set);
                continue;
            }

            match try_place(&mut set, needed, &matching, &mut nodes, &mut placements) {
                Ok(placed) => {
                    for node_name in &placed {
                        accept_all_unaccepted(nodes.get_mut(node_name).expect("placed node must exist"));
                    }
                    admitted.push(set);
                }
                Err(()) => {
                    // Not enough matching capacity for the gang threshold; `try_place` already
                    // rolled back every tentative debit it made, so the PodSet is unchanged.
                    admitted.push(set);
                }
            }
        }

        // Only PodSets that still have pending work (beyond what the gang pass placed) enter
        // the DRF top-up pass; the dominant share is computed against current usage.
        let mut pq = PriorityQueue::new();
        for (idx, set) in admitted.iter().enumerate() {
            if !set.pending.is_empty() {
                let share = set.allocated().dominant_share(&total);
                pq.push(share, idx);
            }
        }

        loop {
            let Some((_, idx)) = pq.pop() else { break };
            let matching = matching_node_names(&admitted[idx], &nodes);
            let placed_one = {
                let set = &mut admitted[idx];
                if set.pending.is_empty() {
                    None
                } else {
                    match try_place(set, 1, &matching, &mut nodes, &mut placements) {
                        Ok(placed) => {
                            for node_name in &placed {
                                accept_all_unaccepted(nodes.get_mut(node_name).expect("placed node must exist"));
                            }
                            Some(())
                        }
                        Err(()) => None,
                    }
                }
            };
            if placed_one.is_some() {
                let set = &admitted[idx];
                if !set.pending.is_empty() {
                    let share = set.allocated().dominant_share(&total);
                    pq.push(share, idx);
                }
            }
            // A failed placement attempt (no fitting node) permanently drops this PodSet from
            // the DRF pass for this tick — retrying it would loop forever against the same
            // exhausted nodes.
        }

        AllocationOutput { consumers, placements, nodes }
    }
}

/// Node names matching every pod's selector/affinity in the set, order-stable (node iteration
/// order from the caller's map, sorted by name for reproducibility — §4.3's stability rule).
fn matching_node_names(set: &PodSet, nodes: &HashMap<String, NodeInfo>) -> Vec<String> {
    let mut names: Vec<&String> = nodes.keys().collect();
    names.sort();
    let sample_pod = set.pending.first().or_else(|| set.running.first());
    match sample_pod {
        None => names.into_iter().cloned().collect(),
        Some(pod) => names
            .into_iter()
            .filter(|n| matches_pod(pod, &nodes[*n]))
            .cloned()
            .collect(),
    }
}

fn undo_tentative(nodes: &mut HashMap<String, NodeInfo>, node_name: &str, request: &Resource) {
    if let Some(node) = nodes.get_mut(node_name) {
        node.credit_unaccepted(request);
    }
}

/// First-fit placement of up to `min` pending pods of `set` onto `matching` nodes, in node order.
/// All placements made are *unaccepted* debits. On success, the placed pods move out of
/// `set.pending` into `set.running` for good (so `set.allocated()` — and the dominant share
/// computed from it — reflects the acceptance immediately) and the placed node names are
/// returned. On failure, `set.pending` is left exactly as it was passed in and every tentative
/// debit made during the attempt is reversed — the caller sees no partial effect either way.
fn try_place(
    set: &mut PodSet,
    min: usize,
    matching: &[String],
    nodes: &mut HashMap<String, NodeInfo>,
    placements: &mut Vec<Placement>,
) -> Result<Vec<String>, ()> {
    let mut placed: Vec<(PodInfo, String)> = Vec::new();
    let mut remaining = std::mem::take(&mut set.pending);
    let mut still_pending = Vec::new();

    'pods: for pod in remaining.drain(..) {
        if placed.len() >= min {
            still_pending.push(pod);
            continue;
        }
        for node_name in matching {
            let Some(node) = nodes.get_mut(node_name) else { continue };
            if node.fits(&pod.spec.resources) {
                node.debit_unaccepted(&pod.spec.resources);
                placed.push((pod, node_name.clone()));
                continue 'pods;
            }
        }
        still_pending.push(pod);
    }

    still_pending.extend(remaining);

    if placed.len() == min {
        let placed_nodes = placed.iter().map(|(_, n)| n.clone()).collect();
        for (mut pod, node_name) in placed {
            placements.push(Placement { pod_name: pod.name.clone(), node_name: node_name.clone() });
            pod.scheduled = Some(node_name);
            set.running.push(pod);
        }
        set.pending = still_pending;
        Ok(placed_nodes)
    } else {
        for (pod, node_name) in placed {
            undo_tentative(nodes, &node_name, &pod.spec.resources);
            still_pending.push(pod);
        }
        set.pending = still_pending;
        Err(())
    }
}

/// Folds a node's entire tentative `unaccepted` balance into `requested`. Safe to call on any
/// node this pass touched, since nothing else contends for `unaccepted` mid-tick.
fn accept_all_unaccepted(node: &mut NodeInfo) {
    let amount = node.unaccepted.clone();
    node.accept(&amount);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConsumerInfo, PodPhase, PodSpec};

    fn node(name: &str, cpu: u64) -> (String, NodeInfo) {
        (
            name.to_string(),
            NodeInfo { name: name.to_string(), allocatable: Resource::new(cpu, 0), ..Default::default() },
        )
    }

    fn pending_pod(name: &str, owner: &str, cpu: u64, min_available: u64) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            owner_uid: owner.to_string(),
            namespace: "c1".to_string(),
            phase: PodPhase::Pending,
            min_available,
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    fn pod_set(owner: &str, pods: Vec<PodInfo>, min_available: u64) -> PodSet {
        let mut set = PodSet::new(owner, "c1", owner, min_available);
        for p in pods {
            set.add_pod(p);
        }
        set
    }

    #[test]
    fn single_pod_fits_single_node() {
        let nodes = HashMap::from([node("n1", 2)]);
        let set = pod_set("job-1", vec![pending_pod("p1", "job-1", 1, 1)], 1);
        let out = DrfPolicy::new().allocate(AllocationInput {
            consumers: Vec::<ConsumerInfo>::new(),
            pod_sets: vec![set],
            nodes,
        });
        assert_eq!(out.placements.len(), 1);
        assert_eq!(out.placements[0].node_name, "n1");
        assert_eq!(out.nodes["n1"].requested, Resource::new(1, 0));
        assert!(out.nodes["n1"].unaccepted.is_zero());
    }

    #[test]
    fn gang_blocks_partial_placement() {
        let nodes = HashMap::from([node("n1", 2)]);
        let pods = vec![
            pending_pod("p1", "job-1", 1, 3),
            pending_pod("p2", "job-1", 1, 3),
            pending_pod("p3", "job-1", 1, 3),
        ];
        let set = pod_set("job-1", pods, 3);
        let out = DrfPolicy::new().allocate(AllocationInput {
            consumers: Vec::<ConsumerInfo>::new(),
            pod_sets: vec![set],
            nodes,
        });
        assert!(out.placements.is_empty());
        assert!(out.nodes["n1"].requested.is_zero());
        assert!(out.nodes["n1"].unaccepted.is_zero());
    }

    #[test]
    fn gang_admits_then_drf_tops_up() {
        let nodes = HashMap::from([node("n1", 5)]);
        let pods = vec![
            pending_pod("p1", "job-1", 1, 3),
            pending_pod("p2", "job-1", 1, 3),
            pending_pod("p3", "job-1", 1, 3),
            pending_pod("p4", "job-1", 1, 3),
        ];
        let set = pod_set("job-1", pods, 3);
        let out = DrfPolicy::new().allocate(AllocationInput {
            consumers: Vec::<ConsumerInfo>::new(),
            pod_sets: vec![set],
            nodes,
        });
        assert_eq!(out.placements.len(), 4);
        assert_eq!(out.nodes["n1"].requested, Resource::new(4, 0));
    }

    fn running_pod(name: &str, owner: &str, cpu: u64) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            owner_uid: owner.to_string(),
            namespace: "c1".to_string(),
            phase: PodPhase::Running,
            spec: PodSpec { resources: Resource::new(cpu, 0), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn accepted_placements_update_dominant_share_for_the_next_pick() {
        let mut n1 = NodeInfo { name: "n1".to_string(), allocatable: Resource::new(4, 0), ..Default::default() };
        n1.requested = Resource::new(1, 0);
        let nodes = HashMap::from([("n1".to_string(), n1)]);

        let mut job_a = pod_set("job-a", vec![], 0);
        job_a.add_pod(running_pod("a1", "job-a", 1));
        job_a.add_pod(pending_pod("a2", "job-a", 1, 0));
        job_a.add_pod(pending_pod("a3", "job-a", 1, 0));

        let job_b = pod_set("job-b", vec![pending_pod("b1", "job-b", 1, 0), pending_pod("b2", "job-b", 1, 0)], 0);

        let out = DrfPolicy::new().allocate(AllocationInput {
            consumers: Vec::<ConsumerInfo>::new(),
            pod_sets: vec![job_a, job_b],
            nodes,
        });

        // job-b starts with the lower dominant share (0.0 vs job-a's 0.25 from its running pod)
        // and wins the first pick. If accepted placements didn't update the share, job-b's share
        // would stay frozen at 0.0 and it would win every subsequent pick too, placing both of its
        // pending pods (b1, b2) before job-a ever gets a second turn. With the share correctly
        // recomputed after each accept, ownership of the single remaining slot alternates: job-a's
        // a2 is placed between job-b's b1 and b2.
        let order: Vec<&str> = out.placements.iter().map(|p| p.pod_name.as_str()).collect();
        assert_eq!(order, vec!["b1", "a2", "b2"]);
    }

    #[test]
    fn podset_exceeding_any_node_capacity_never_admits() {
        let nodes = HashMap::from([node("n1", 1), node("n2", 1)]);
        let set = pod_set("job-1", vec![pending_pod("p1", "job-1", 5, 1)], 1);
        let out = DrfPolicy::new().allocate(AllocationInput {
            consumers: Vec::<ConsumerInfo>::new(),
            pod_sets: vec![set],
            nodes,
        });
        assert!(out.placements.is_empty());
    }
}
