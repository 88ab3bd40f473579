//! Runtime context for Drover execution
//!
//! This module provides the one [`ExecutionContext`] every component shares:
//! - A key/value store for flags and arbitrary run state
//! - The target list, plus named target groups (roles)
//! - The enabled output channels
//! - The deferred-action queues, the named mutex registry and the tracker
//!   for dispatched work
//!
//! The context is created once per run and passed around as
//! `Arc<ExecutionContext>`. Individual operations are synchronized internally,
//! but there is no isolation between concurrently running tasks: the last
//! write wins. Critical sections that must not interleave go through
//! [`crate::executor::throttle::with_lock`].

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::Result;
use crate::executor::async_task::AsyncTracker;
use crate::executor::throttle::MutexRegistry;
use crate::handlers::HookQueues;
use crate::output::LogLevel;
use crate::switch::MODE_SUDO;

/// Context key holding the parallel-mode flag.
pub const PARALLEL_KEY: &str = "parallel";

/// Context key holding the sudo password.
pub const SUDO_PASSWORD_KEY: &str = "sudo_password";

/// Shared state for one run.
#[derive(Default)]
pub struct ExecutionContext {
    /// Free-form values, namespaced by convention
    vars: RwLock<IndexMap<String, JsonValue>>,

    /// Targets the next cohort fans out over
    targets: RwLock<Vec<String>>,

    /// Named groups of targets
    roles: RwLock<IndexMap<String, Vec<String>>>,

    /// Enabled output channels
    log_level: RwLock<LogLevel>,

    hooks: HookQueues,
    mutexes: MutexRegistry,
    tracker: AsyncTracker,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("vars", &self.vars.read().keys().collect::<Vec<_>>())
            .field("targets", &*self.targets.read())
            .field("roles", &*self.roles.read())
            .field("log_level", &self.log_level.read().to_string())
            .field("outstanding", &self.tracker.outstanding())
            .finish()
    }
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared empty context
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed a context from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let ctx = Self::new();
        ctx.set_targets(config.defaults.hosts.clone());
        ctx.set_parallel(config.defaults.parallel);
        ctx.set_log_level(config.logging.log_level.parse()?);

        if config.privilege_escalation.sudo {
            ctx.set(MODE_SUDO.key, MODE_SUDO.on.clone());
        }
        if let Some(password) = &config.privilege_escalation.sudo_password {
            ctx.set(SUDO_PASSWORD_KEY, password.as_str());
        }

        debug!(
            "Execution context ready: {} targets, parallel={}",
            ctx.targets().len(),
            ctx.parallel()
        );
        Ok(ctx)
    }

    // ------------------------------------------------------------------
    // Key/value store
    // ------------------------------------------------------------------

    /// Get a value
    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.vars.read().get(key).cloned()
    }

    /// Get a value, or `default` when the key is absent
    pub fn get_or(&self, key: &str, default: impl Into<JsonValue>) -> JsonValue {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Set a value, returning the previous one
    pub fn set(&self, key: impl Into<String>, value: impl Into<JsonValue>) -> Option<JsonValue> {
        let key = key.into();
        let value = value.into();
        trace!("Setting context value: {} = {:?}", key, value);
        self.vars.write().insert(key, value)
    }

    /// Remove a value, returning it
    pub fn delete(&self, key: &str) -> Option<JsonValue> {
        trace!("Removing context value: {}", key);
        self.vars.write().shift_remove(key)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.vars.read().contains_key(key)
    }

    /// Copy of every value, in insertion order
    pub fn snapshot(&self) -> IndexMap<String, JsonValue> {
        self.vars.read().clone()
    }

    /// Current value of a scoped flag, looked up by key
    pub fn current_flag(&self, key: &str) -> Option<JsonValue> {
        self.get(key).filter(|v| !v.is_null())
    }

    /// Whether dispatched work runs on independent tasks
    pub fn parallel(&self) -> bool {
        self.get(PARALLEL_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn set_parallel(&self, parallel: bool) {
        self.set(PARALLEL_KEY, parallel);
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    /// The current target list
    pub fn targets(&self) -> Vec<String> {
        self.targets.read().clone()
    }

    /// Replace the target list
    pub fn set_targets<I, S>(&self, targets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        for target in targets {
            let target = target.into();
            if !list.contains(&target) {
                list.push(target);
            }
        }
        *self.targets.write() = list;
    }

    /// Append a target if it is not already present. Returns true if added.
    pub fn add_target(&self, target: impl Into<String>) -> bool {
        let target = target.into();
        let mut targets = self.targets.write();
        if targets.contains(&target) {
            false
        } else {
            debug!("Adding target {}", target);
            targets.push(target);
            true
        }
    }

    /// Targets registered under a role
    pub fn role_targets(&self, role: &str) -> Vec<String> {
        self.roles.read().get(role).cloned().unwrap_or_default()
    }

    /// Names of every known role
    pub fn roles(&self) -> Vec<String> {
        self.roles.read().keys().cloned().collect()
    }

    /// Register a target under a role and in the target list
    pub fn add_target_to_role(&self, role: &str, target: impl Into<String>) {
        let target = target.into();
        {
            let mut roles = self.roles.write();
            let members = roles.entry(role.to_string()).or_default();
            if !members.contains(&target) {
                members.push(target.clone());
            }
        }
        self.add_target(target);
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn log_level(&self) -> LogLevel {
        self.log_level.read().clone()
    }

    pub fn set_log_level(&self, level: LogLevel) {
        *self.log_level.write() = level;
    }

    /// Deferred-action queues
    pub fn hooks(&self) -> &HookQueues {
        &self.hooks
    }

    /// Named mutex registry
    pub fn mutexes(&self) -> &MutexRegistry {
        &self.mutexes
    }

    /// Tracker for dispatched work
    pub fn tracker(&self) -> &AsyncTracker {
        &self.tracker
    }
}
