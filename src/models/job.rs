use std::collections::HashMap;

use super::{PodInfo, PodSet, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Allocated,
    Bound,
    Running,
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

pub const TASK_STATUSES: [TaskStatus; 8] = [
    TaskStatus::Pending,
    TaskStatus::Allocated,
    TaskStatus::Bound,
    TaskStatus::Running,
    TaskStatus::Releasing,
    TaskStatus::Succeeded,
    TaskStatus::Failed,
    TaskStatus::Unknown,
];

#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub uid: String,
    pub job_uid: String,
    pub namespace: String,
    pub name: String,
    pub node_name: Option<String>,
    pub request: Resource,
    pub status: TaskStatus,
}

/// An indexed map of TaskInfos keyed by lifecycle status. `task_status_index[status]` always
/// enumerates exactly the tasks whose current status is `status` — an internal invariant
/// violation (an unknown status, or a task missing from its index bucket) is a programming
/// defect, not a recoverable condition.
#[derive(Debug, Clone, Default)]
pub struct JobInfo {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub min_available: u64,
    tasks: HashMap<String, TaskInfo>,
    task_status_index: HashMap<TaskStatus, Vec<String>>,
}

impl JobInfo {
    pub fn new(uid: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>, min_available: u64) -> Self {
        Self {
            uid: uid.into(),
            namespace: namespace.into(),
            name: name.into(),
            min_available,
            tasks: HashMap::new(),
            task_status_index: HashMap::new(),
        }
    }

    pub fn add_task(&mut self, task: TaskInfo) {
        self.task_status_index
            .entry(task.status)
            .or_default()
            .push(task.uid.clone());
        self.tasks.insert(task.uid.clone(), task);
    }

    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&TaskInfo> {
        self.task_status_index
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|uid| self.tasks.get(uid))
            .collect()
    }

    pub fn task(&self, uid: &str) -> Option<&TaskInfo> {
        self.tasks.get(uid)
    }

    /// Moves a task from its current index bucket to `new_status`. Panics if the task is
    /// unknown — `task_status_index` not reflecting `tasks` is an internal invariant violation.
    pub fn update_task_status(&mut self, uid: &str, new_status: TaskStatus) {
        let task = self.tasks.get_mut(uid).expect("unknown task uid in JobInfo");
        let old_status = task.status;
        task.status = new_status;
        if let Some(bucket) = self.task_status_index.get_mut(&old_status) {
            bucket.retain(|u| u != uid);
        }
        self.task_status_index
            .entry(new_status)
            .or_default()
            .push(uid.to_string());
    }

    /// Tasks already counted toward the gang threshold: bound, running, allocated this tick, or
    /// already succeeded.
    pub fn occupied_count(&self) -> usize {
        [TaskStatus::Bound, TaskStatus::Running, TaskStatus::Allocated, TaskStatus::Succeeded]
            .iter()
            .map(|s| self.tasks_with_status(*s).len())
            .sum()
    }

    pub fn is_ready(&self) -> bool {
        self.occupied_count() >= self.min_available as usize
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut TaskInfo> {
        self.tasks.values_mut()
    }

    /// Builds the framework-form JobInfo the session works with out of a PodSet taken from a
    /// cache snapshot. A pod's uid becomes its task uid (falling back to its name for pods that
    /// predate uid assignment); Running/Pending phases map directly, `Others` never occurs here
    /// because the cache only ever stores active pods.
    pub fn from_pod_set(set: &PodSet) -> Self {
        let uid = if set.owner_uid.is_empty() {
            format!("{}/{}", set.namespace, set.name)
        } else {
            set.owner_uid.clone()
        };
        let mut job = JobInfo::new(uid.clone(), set.namespace.clone(), set.name.clone(), set.min_available);
        for pod in set.running.iter().chain(set.pending.iter()).chain(set.others.iter()) {
            job.add_task(task_from_pod(pod, &uid));
        }
        job
    }
}

fn task_from_pod(pod: &PodInfo, job_uid: &str) -> TaskInfo {
    use super::PodPhase;
    let status = match pod.phase {
        PodPhase::Running => TaskStatus::Running,
        PodPhase::Pending => TaskStatus::Pending,
        PodPhase::Succeeded => TaskStatus::Succeeded,
        PodPhase::Failed => TaskStatus::Failed,
        PodPhase::Unknown => TaskStatus::Unknown,
    };
    TaskInfo {
        uid: if pod.uid.is_empty() { pod.name.clone() } else { pod.uid.clone() },
        job_uid: job_uid.to_string(),
        namespace: pod.namespace.clone(),
        name: pod.name.clone(),
        node_name: pod.scheduled.clone(),
        request: pod.spec.resources.clone(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(uid: &str, status: TaskStatus) -> TaskInfo {
        TaskInfo {
            uid: uid.to_string(),
            job_uid: "job-1".to_string(),
            namespace: "ns".to_string(),
            name: uid.to_string(),
            node_name: None,
            request: Resource::new(1, 1),
            status,
        }
    }

    #[test]
    fn status_index_tracks_moves() {
        let mut job = JobInfo::new("job-1", "ns", "job", 2);
        job.add_task(task("t1", TaskStatus::Pending));
        job.add_task(task("t2", TaskStatus::Pending));
        assert_eq!(job.tasks_with_status(TaskStatus::Pending).len(), 2);

        job.update_task_status("t1", TaskStatus::Allocated);
        assert_eq!(job.tasks_with_status(TaskStatus::Pending).len(), 1);
        assert_eq!(job.tasks_with_status(TaskStatus::Allocated).len(), 1);
    }

    #[test]
    fn readiness_counts_occupied_statuses_against_min_available() {
        let mut job = JobInfo::new("job-1", "ns", "job", 2);
        job.add_task(task("t1", TaskStatus::Running));
        job.add_task(task("t2", TaskStatus::Pending));
        assert!(!job.is_ready());
        job.update_task_status("t2", TaskStatus::Allocated);
        assert!(job.is_ready());
    }

    #[test]
    fn from_pod_set_maps_phase_to_status_and_keys_by_owner_uid() {
        use crate::models::{PodInfo, PodPhase, PodSet, PodSpec};

        let mut set = PodSet::new("owner-1", "ns", "job", 2);
        set.add_pod(PodInfo {
            uid: "t1".to_string(),
            owner_uid: "owner-1".to_string(),
            phase: PodPhase::Running,
            scheduled: Some("n1".to_string()),
            spec: PodSpec { resources: Resource::new(1, 1), ..Default::default() },
            ..Default::default()
        });
        set.add_pod(PodInfo {
            uid: "t2".to_string(),
            owner_uid: "owner-1".to_string(),
            phase: PodPhase::Pending,
            spec: PodSpec { resources: Resource::new(1, 1), ..Default::default() },
            ..Default::default()
        });

        let job = JobInfo::from_pod_set(&set);
        assert_eq!(job.uid, "owner-1");
        assert_eq!(job.tasks_with_status(TaskStatus::Running).len(), 1);
        assert_eq!(job.tasks_with_status(TaskStatus::Pending).len(), 1);
        assert_eq!(job.task("t1").unwrap().node_name.as_deref(), Some("n1"));
    }
}
