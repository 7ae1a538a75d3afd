//! Weighted max-min fair share (§4.2): per resource dimension, give each consumer queue the
//! larger of its request or its weighted share of what's left, processing queues ascending by
//! request so the smallest demands are satisfied first and their unused weight frees up room
//! for the rest. A secondary fill pass hands out anything a rounding-down primary pass left on
//! the table, descending by weight.

use super::{AllocationInput, AllocationOutput, Policy};
use crate::models::{ConsumerInfo, Resource};

#[derive(Debug, Clone, Default)]
pub struct ProportionPolicy;

impl ProportionPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for ProportionPolicy {
    fn name(&self) -> &str {
        "proportion"
    }

    fn allocate(&self, input: AllocationInput) -> AllocationOutput {
        let mut consumers = input.consumers;

        let total: Resource = input
            .nodes
            .values()
            .fold(Resource::zero(), |acc, n| acc.add(&n.allocatable));
        let total_weight: u64 = consumers.iter().map(|c| c.spec.weight).sum();

        if total.is_zero() || total_weight == 0 {
            for c in &mut consumers {
                c.status.deserved = Resource::zero();
            }
            return AllocationOutput {
                consumers,
                placements: Vec::new(),
                nodes: input.nodes,
            };
        }

        for c in &mut consumers {
            c.status.deserved = Resource::zero();
        }

        for dim in total.dimensions() {
            let leftover = primary_pass(&mut consumers, dim, total.get(dim), total_weight);
            secondary_pass(&mut consumers, dim, leftover);
        }

        AllocationOutput {
            consumers,
            placements: Vec::new(),
            nodes: input.nodes,
        }
    }
}

/// Step 2: ascending by request on this dimension, tie-broken by smaller request then
/// lexicographic `namespace/name`. Each queue takes `min(request, weight * leftRes / leftWeight)`;
/// the give debits both `leftRes` and `leftWeight` for the queues still to come.
fn primary_pass(consumers: &mut [ConsumerInfo], dim: &str, total_res: u64, total_weight: u64) -> u64 {
    let mut order: Vec<usize> = (0..consumers.len()).collect();
    order.sort_by(|&a, &b| {
        consumers[a]
            .spec
            .request
            .get(dim)
            .cmp(&consumers[b].spec.request.get(dim))
            .then_with(|| consumers[a].key().cmp(&consumers[b].key()))
    });

    let mut left_res = total_res;
    let mut left_weight = total_weight;
    for idx in order {
        let weight = consumers[idx].spec.weight;
        if weight == 0 || left_weight == 0 {
            continue;
        }
        let request = consumers[idx].spec.request.get(dim);
        let share = (weight as u128 * left_res as u128 / left_weight as u128) as u64;
        let give = request.min(share);
        consumers[idx].status.deserved.set(dim, consumers[idx].status.deserved.get(dim) + give);
        left_res = left_res.saturating_sub(give);
        left_weight = left_weight.saturating_sub(weight);
    }
    left_res
}

/// Step 3: whatever `primary_pass` left unassigned on this dimension goes to queues with
/// unmet request, descending by weight.
fn secondary_pass(consumers: &mut [ConsumerInfo], dim: &str, mut leftover: u64) {
    let mut order: Vec<usize> = (0..consumers.len())
        .filter(|&i| consumers[i].spec.weight > 0)
        .collect();
    order.sort_by(|&a, &b| {
        consumers[b]
            .spec
            .weight
            .cmp(&consumers[a].spec.weight)
            .then_with(|| consumers[a].key().cmp(&consumers[b].key()))
    });

    for idx in order {
        if leftover == 0 {
            break;
        }
        let deserved = consumers[idx].status.deserved.get(dim);
        let request = consumers[idx].spec.request.get(dim);
        let room = request.saturating_sub(deserved);
        let give = room.min(leftover);
        if give == 0 {
            continue;
        }
        consumers[idx].status.deserved.set(dim, deserved + give);
        leftover -= give;
    }
}
