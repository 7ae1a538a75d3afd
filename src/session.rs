//! The tick-scoped scheduling session (C7). Opened over a cache snapshot, it owns the job index
//! actions work against and the ordered callback lists plugins install via `on_session_open`.
//! Everything here lives on the tick thread and is discarded at `close_session`.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::cache::Snapshot;
use crate::models::{JobInfo, NodeInfo};

pub type JobOrderFn = Box<dyn Fn(&JobInfo, &JobInfo) -> Ordering + Send + Sync>;
pub type PreemptableFn = Box<dyn Fn(&JobInfo, &JobInfo) -> bool + Send + Sync>;
pub type JobReadyFn = Box<dyn Fn(&JobInfo) -> bool + Send + Sync>;

/// A tentative bind decision an action recorded against the session; the controller publishes
/// these and calls `Cache::assume_pod` on session close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindDecision {
    pub namespace: String,
    pub name: String,
    pub task_uid: String,
    pub node_name: String,
}

/// A tentative eviction decision; the controller publishes these as deletes on session close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictDecision {
    pub namespace: String,
    pub name: String,
    pub task_uid: String,
}

/// Installs job-order/preemptable/job-ready callbacks when a session opens, and may tear down any
/// session-scoped state it stashed when the session closes. Plugins are pure functions over
/// session data; they must not retain references past `on_session_close`.
pub trait SessionPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn on_session_open(&self, session: &mut Session);
    fn on_session_close(&self, _session: &mut Session) {}
}

#[derive(Default)]
pub struct Session {
    pub job_index: HashMap<String, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub binds: Vec<BindDecision>,
    pub evictions: Vec<EvictDecision>,
    job_order_fns: Vec<JobOrderFn>,
    preemptable_fns: Vec<PreemptableFn>,
    job_ready_fns: Vec<JobReadyFn>,
}

impl Session {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        let job_index = snapshot
            .pod_sets()
            .iter()
            .map(|set| {
                let job = JobInfo::from_pod_set(set);
                (job.uid.clone(), job)
            })
            .collect();
        Session {
            job_index,
            nodes: snapshot.nodes.clone(),
            ..Default::default()
        }
    }

    pub fn add_job_order_fn(&mut self, f: JobOrderFn) {
        self.job_order_fns.push(f);
    }

    pub fn add_preemptable_fn(&mut self, f: PreemptableFn) {
        self.preemptable_fns.push(f);
    }

    pub fn add_job_ready_fn(&mut self, f: JobReadyFn) {
        self.job_ready_fns.push(f);
    }

    /// Lexicographic over registered JobOrderFns: the first to return a non-`Equal` ordering
    /// wins. Falls back to uid for full determinism once every installed comparator ties.
    pub fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Ordering {
        for f in &self.job_order_fns {
            let o = f(l, r);
            if o != Ordering::Equal {
                return o;
            }
        }
        l.uid.cmp(&r.uid)
    }

    /// AND over every registered PreemptableFn — a victim must clear every guard to be evictable.
    pub fn preemptable(&self, preemptor: &JobInfo, preemptee: &JobInfo) -> bool {
        self.preemptable_fns.iter().all(|f| f(preemptor, preemptee))
    }

    /// AND over every registered JobReadyFn; falls back to the job's own occupied-count test
    /// when no plugin installed a stricter readiness rule.
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        if self.job_ready_fns.is_empty() {
            job.is_ready()
        } else {
            self.job_ready_fns.iter().all(|f| f(job))
        }
    }

    pub fn jobs_in_order(&self) -> Vec<&JobInfo> {
        let mut jobs: Vec<&JobInfo> = self.job_index.values().collect();
        jobs.sort_by(|a, b| self.job_order(a, b));
        jobs
    }
}

/// Builds a session over `snapshot`, then runs every plugin's `on_session_open` so the session's
/// callback lists are populated before any action executes.
pub fn open_session(snapshot: &Snapshot, plugins: &[Box<dyn SessionPlugin>]) -> Session {
    let mut session = Session::from_snapshot(snapshot);
    for p in plugins {
        p.on_session_open(&mut session);
    }
    session
}

/// Runs every plugin's `on_session_close` in reverse registration order, then discards the
/// session along with every callback it held.
pub fn close_session(mut session: Session, plugins: &[Box<dyn SessionPlugin>]) {
    for p in plugins.iter().rev() {
        p.on_session_close(&mut session);
    }
}
