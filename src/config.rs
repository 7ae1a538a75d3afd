//! Configuration and entry point (C11). `SchedulerConfig` names the policy and the ordered list
//! of actions to run each tick; `run_scheduler` resolves both from the C6 registries, wires the
//! cache, session framework, controller, and a cluster client together, and hands back a handle
//! plus an assignment-result stream for callers that want to observe outcomes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::cluster_client::ClusterClient;
use crate::controller::{run_informers, sync_cache, Controller};
use crate::models::Assignment;
use crate::plugins::Registry as PlacementRegistry;
use crate::policy::Policy;
use crate::registry::{build_action, build_policy};

fn default_policy_name() -> String {
    "drf".to_string()
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler_name: String,
    #[serde(default = "default_policy_name")]
    pub policy_name: String,
    pub action_names: Vec<String>,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: "batchsched".to_string(),
            policy_name: default_policy_name(),
            action_names: vec!["allocate".to_string(), "preempt".to_string()],
            tick_interval: default_tick_interval(),
        }
    }
}

/// A running scheduler: the resolved policy (for callers that want to invoke the batch allocation
/// engine directly, independent of the per-tick controller), the cache it shares with the
/// controller, and a stop switch that brings down every spawned loop.
pub struct SchedulerHandle {
    pub cache: Arc<Cache>,
    pub policy: Arc<dyn Policy>,
    stop: watch::Sender<bool>,
    informers: JoinHandle<()>,
    scheduling: JoinHandle<()>,
    publication: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals every spawned loop to stop. Does not wait for them to finish; call `join` for that.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub async fn join(self) {
        self.stop();
        let _ = tokio::join!(self.informers, self.scheduling, self.publication);
    }
}

/// Resolves `config.policy_name` and `config.action_names` against the C6 registries (an unknown
/// name is a fatal configuration error, §7 item 2), syncs the cache from `cluster`, and spawns the
/// informer and controller loops. The resolved policy is run by the controller itself at the start
/// of every tick (see `Controller::tick`), so `policy_name` genuinely drives placement rather than
/// sitting unused.
pub async fn run_scheduler(config: SchedulerConfig, cluster: Arc<dyn ClusterClient>) -> Result<(SchedulerHandle, mpsc::UnboundedReceiver<Assignment>)> {
    log::info!("starting scheduler {} (policy={}, actions={:?})", config.scheduler_name, config.policy_name, config.action_names);

    let policy: Arc<dyn Policy> = Arc::from(build_policy(&config.policy_name).context("resolving configured policy")?);
    let placement_registry = Arc::new(PlacementRegistry::default());
    let mut actions = Vec::with_capacity(config.action_names.len());
    for name in &config.action_names {
        actions.push(build_action(name, placement_registry.clone()).context("resolving configured action")?);
    }

    let cache = Arc::new(Cache::new());
    sync_cache(&cache, cluster.as_ref()).await.context("initial cache sync")?;

    let (controller, assignments) = Controller::new(cache.clone(), cluster.clone(), policy.clone(), Vec::new(), actions, config.tick_interval);
    let (stop_tx, stop_rx) = watch::channel(false);

    let informers = tokio::spawn(run_informers(cache.clone(), cluster, stop_rx.clone()));
    let (scheduling, publication) = controller.spawn(stop_rx);

    let handle = SchedulerHandle { cache, policy, stop: stop_tx, informers, scheduling, publication };
    Ok((handle, assignments))
}
