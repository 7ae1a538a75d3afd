//! Process-wide name → builder maps for policies and actions (C6), initialized once and guarded
//! by a mutex (§9). `SchedulerConfig` resolves `policy_name`/`action_names` against these at
//! startup; an unknown name is a configuration error (§7 item 2), not a panic.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use anyhow::{Result, bail};

use crate::actions::{Action, Allocate, Preempt};
use crate::plugins::Registry as PlacementRegistry;
use crate::policy::{DrfPolicy, Policy, ProportionPolicy};
use std::sync::Arc;

type PolicyBuilder = Box<dyn Fn() -> Box<dyn Policy> + Send + Sync>;
type ActionBuilder = Box<dyn Fn(Arc<PlacementRegistry>) -> Box<dyn Action> + Send + Sync>;

fn policy_builders() -> &'static Mutex<HashMap<String, PolicyBuilder>> {
    static BUILDERS: OnceLock<Mutex<HashMap<String, PolicyBuilder>>> = OnceLock::new();
    BUILDERS.get_or_init(|| Mutex::new(default_policy_builders()))
}

fn action_builders() -> &'static Mutex<HashMap<String, ActionBuilder>> {
    static BUILDERS: OnceLock<Mutex<HashMap<String, ActionBuilder>>> = OnceLock::new();
    BUILDERS.get_or_init(|| Mutex::new(default_action_builders()))
}

fn default_policy_builders() -> HashMap<String, PolicyBuilder> {
    let mut m: HashMap<String, PolicyBuilder> = HashMap::new();
    m.insert("drf".to_string(), Box::new(|| Box::new(DrfPolicy::new())));
    m.insert("proportion".to_string(), Box::new(|| Box::new(ProportionPolicy::new())));
    m
}

fn default_action_builders() -> HashMap<String, ActionBuilder> {
    let mut m: HashMap<String, ActionBuilder> = HashMap::new();
    m.insert("allocate".to_string(), Box::new(|registry| Box::new(Allocate::new(registry)) as Box<dyn Action>));
    m.insert("preempt".to_string(), Box::new(|_registry| Box::new(Preempt) as Box<dyn Action>));
    m
}

/// Registers (or replaces) the builder for `name` in the policy registry.
pub fn register_policy(name: impl Into<String>, builder: PolicyBuilder) {
    policy_builders().lock().expect("policy registry mutex poisoned").insert(name.into(), builder);
}

/// Registers (or replaces) the builder for `name` in the action registry.
pub fn register_action(name: impl Into<String>, builder: ActionBuilder) {
    action_builders().lock().expect("action registry mutex poisoned").insert(name.into(), builder);
}

/// Builds the named policy, or a configuration error (§7 item 2) if no builder is registered.
pub fn build_policy(name: &str) -> Result<Box<dyn Policy>> {
    let builders = policy_builders().lock().expect("policy registry mutex poisoned");
    match builders.get(name) {
        Some(builder) => Ok(builder()),
        None => bail!("unknown policy name: {name}"),
    }
}

/// Builds the named action wired to the shared node-placement registry, or a configuration error
/// if no builder is registered.
pub fn build_action(name: &str, placement_registry: Arc<PlacementRegistry>) -> Result<Box<dyn Action>> {
    let builders = action_builders().lock().expect("action registry mutex poisoned");
    match builders.get(name) {
        Some(builder) => Ok(builder(placement_registry)),
        None => bail!("unknown action name: {name}"),
    }
}

/// Restores both registries to their built-in defaults. Tests that register scratch builders
/// call this between cases so registrations don't leak across test functions.
pub fn cleanup() {
    *policy_builders().lock().expect("policy registry mutex poisoned") = default_policy_builders();
    *action_builders().lock().expect("action registry mutex poisoned") = default_action_builders();
}
