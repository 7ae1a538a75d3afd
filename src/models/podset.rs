use super::{PodInfo, PodPhase, Resource};

/// A group of pods sharing an owner reference, treated atomically by the gang rule (§4.3).
#[derive(Debug, Clone, Default)]
pub struct PodSet {
    pub owner_uid: String,
    pub namespace: String,
    pub name: String,
    pub min_available: u64,
    pub running: Vec<PodInfo>,
    pub pending: Vec<PodInfo>,
    pub others: Vec<PodInfo>,
}

impl PodSet {
    pub fn new(owner_uid: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>, min_available: u64) -> Self {
        Self {
            owner_uid: owner_uid.into(),
            namespace: namespace.into(),
            name: name.into(),
            min_available,
            running: Vec::new(),
            pending: Vec::new(),
            others: Vec::new(),
        }
    }

    pub fn add_pod(&mut self, pod: PodInfo) {
        match pod.phase {
            PodPhase::Running => self.running.push(pod),
            PodPhase::Pending => self.pending.push(pod),
            _ => self.others.push(pod),
        }
    }

    pub fn allocated(&self) -> Resource {
        self.running
            .iter()
            .fold(Resource::zero(), |acc, p| acc.add(&p.spec.resources))
    }

    pub fn total_request(&self) -> Resource {
        self.running
            .iter()
            .chain(self.pending.iter())
            .fold(Resource::zero(), |acc, p| acc.add(&p.spec.resources))
    }

    /// How many more pods this PodSet needs scheduled this tick to reach `min_available`.
    pub fn needed(&self) -> usize {
        (self.min_available as usize).saturating_sub(self.running.len())
    }

    /// Gang readiness: already-running plus `newly_scheduled` meets the threshold.
    pub fn is_ready(&self, newly_scheduled: usize) -> bool {
        self.running.len() + newly_scheduled >= self.min_available as usize
    }

    pub fn dictionary_key(&self) -> (&str, &str) {
        (&self.namespace, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PodInfo, PodSpec};

    fn pod(phase: PodPhase, cpu: u64) -> PodInfo {
        PodInfo {
            phase,
            spec: PodSpec {
                resources: Resource::new(cpu, 0),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn partitions_pods_by_phase() {
        let mut set = PodSet::new("owner", "ns", "job", 3);
        set.add_pod(pod(PodPhase::Running, 1));
        set.add_pod(pod(PodPhase::Pending, 1));
        set.add_pod(pod(PodPhase::Failed, 1));
        assert_eq!(set.running.len(), 1);
        assert_eq!(set.pending.len(), 1);
        assert_eq!(set.others.len(), 1);
    }

    #[test]
    fn needed_and_ready_track_min_available() {
        let mut set = PodSet::new("owner", "ns", "job", 3);
        set.add_pod(pod(PodPhase::Running, 1));
        assert_eq!(set.needed(), 2);
        assert!(!set.is_ready(1));
        assert!(set.is_ready(2));
    }

    #[test]
    fn allocated_and_total_request_sum_correctly() {
        let mut set = PodSet::new("owner", "ns", "job", 1);
        set.add_pod(pod(PodPhase::Running, 2));
        set.add_pod(pod(PodPhase::Pending, 3));
        assert_eq!(set.allocated(), Resource::new(2, 0));
        assert_eq!(set.total_request(), Resource::new(5, 0));
    }
}
