//! Core execution engine for Drover
//!
//! This module provides:
//! - The shared [`runtime::ExecutionContext`]
//! - Tasks and task middleware ([`task`])
//! - Named critical sections ([`throttle`])
//! - Fire-and-forget dispatch and the `sync` barrier ([`async_task`])
//! - The cohort [`Executor`], which fans one task out over a target list with
//!   the pre and post hook queues drained around it

pub mod async_task;
pub mod runtime;
pub mod task;
pub mod throttle;

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::executor::async_task::{dispatch, Dispatched};
use crate::executor::runtime::ExecutionContext;
use crate::executor::task::{Task, TaskCall};
use crate::handlers;

/// Runs tasks as cohorts over targets.
pub struct Executor {
    ctx: Arc<ExecutionContext>,
}

impl Executor {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Run `task` once per target.
    ///
    /// The pre hook queue is drained first and the post hook queue last. With
    /// parallel mode on, invocations run on their own tasks; otherwise they
    /// run one after another in target order. Results come back in target
    /// order either way.
    #[instrument(skip(self, task, targets), fields(task = %task.name()))]
    pub async fn execute(
        &self,
        task: Arc<dyn Task>,
        targets: &[String],
    ) -> Result<IndexMap<String, JsonValue>> {
        handlers::run_pre_hook(&self.ctx).await?;

        if targets.is_empty() {
            warn!("No targets to run {} on", task.name());
            handlers::run_post_hook(&self.ctx).await?;
            return Ok(IndexMap::new());
        }

        info!("Running {} on {} target(s)", task.name(), targets.len());
        let results = if self.ctx.parallel() {
            self.run_parallel(&task, targets).await?
        } else {
            self.run_sequential(&task, targets).await?
        };

        handlers::run_post_hook(&self.ctx).await?;
        Ok(results)
    }

    /// Run `task` on every target in the context
    pub async fn execute_on_all(&self, task: Arc<dyn Task>) -> Result<IndexMap<String, JsonValue>> {
        let targets = self.ctx.targets();
        self.execute(task, &targets).await
    }

    /// Run `task` on every member of a role
    pub async fn execute_on_role(
        &self,
        task: Arc<dyn Task>,
        role: &str,
    ) -> Result<IndexMap<String, JsonValue>> {
        let targets = self.ctx.role_targets(role);
        self.execute(task, &targets).await
    }

    async fn run_sequential(
        &self,
        task: &Arc<dyn Task>,
        targets: &[String],
    ) -> Result<IndexMap<String, JsonValue>> {
        let mut results = IndexMap::with_capacity(targets.len());
        for target in targets {
            let call = TaskCall::new(Arc::clone(&self.ctx), target.clone(), targets.len());
            let value = task.run(call).await?;
            results.insert(target.clone(), value);
        }
        Ok(results)
    }

    async fn run_parallel(
        &self,
        task: &Arc<dyn Task>,
        targets: &[String],
    ) -> Result<IndexMap<String, JsonValue>> {
        let mut pending: Vec<(String, Dispatched<Result<JsonValue>>)> = Vec::with_capacity(targets.len());
        for target in targets {
            let call = TaskCall::new(Arc::clone(&self.ctx), target.clone(), targets.len());
            let task = Arc::clone(task);
            let name = format!("{}@{}", task.name(), target);
            let handle = dispatch(&self.ctx, &name, async move { task.run(call).await }).await;
            pending.push((target.clone(), handle));
        }

        // Join everything before reporting, so no invocation outlives the cohort.
        let joined = join_all(
            pending
                .into_iter()
                .map(|(target, handle)| async move { (target, handle.join().await) }),
        )
        .await;

        let mut results = IndexMap::with_capacity(targets.len());
        let mut first_error = None;
        for (target, outcome) in joined {
            match outcome.and_then(|outcome| outcome) {
                Ok(value) => {
                    results.insert(target, value);
                }
                Err(e) => {
                    debug!("{} failed: {}", target, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}
