//! Deferred actions for Drover
//!
//! Tasks often ask for the same side effect many times during one run: every
//! configuration file written for a service wants that service restarted.
//! Instead of acting immediately, they enqueue a deferred action on a named
//! queue and the queue is drained once, later. Queues are:
//!
//! - **Named**: `pre_hook` and `post_hook` are drained around every cohort by
//!   the executor; any other name is an independent channel
//! - **FIFO**: entries run in the order they were enqueued
//! - **Deduplicated**: within one drain, an entry equal to one already run
//!   (same action name, same arguments) is skipped and logged
//!
//! Action identity is the action's name. Two different actions registered
//! under the same name deduplicate against each other.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::executor::runtime::ExecutionContext;

/// Queue drained before the first task of a cohort.
pub const PRE_HOOK: &str = "pre_hook";

/// Queue drained after the last task of a cohort.
pub const POST_HOOK: &str = "post_hook";

/// General purpose queue, drained on demand.
pub const FIFO: &str = "drover_queue";

/// A side effect that can be queued for later.
#[async_trait]
pub trait DeferredAction: Send + Sync {
    /// Identity used for deduplication
    fn name(&self) -> &str;

    /// Perform the action
    async fn call(&self, ctx: Arc<ExecutionContext>, args: Vec<JsonValue>) -> Result<JsonValue>;
}

/// Adapts a closure into a [`DeferredAction`].
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnAction<F>
where
    F: Fn(Arc<ExecutionContext>, Vec<JsonValue>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> DeferredAction for FnAction<F>
where
    F: Fn(Arc<ExecutionContext>, Vec<JsonValue>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: Arc<ExecutionContext>, args: Vec<JsonValue>) -> Result<JsonValue> {
        (self.f)(ctx, args).await
    }
}

/// Build a shared action from a closure
pub fn action<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn DeferredAction>
where
    F: Fn(Arc<ExecutionContext>, Vec<JsonValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue>> + Send + 'static,
{
    Arc::new(FnAction::new(name, f))
}

/// One queued entry.
#[derive(Clone)]
pub struct Deferred {
    pub action: Arc<dyn DeferredAction>,
    pub args: Vec<JsonValue>,
}

impl Deferred {
    pub fn new(action: Arc<dyn DeferredAction>, args: Vec<JsonValue>) -> Self {
        Self { action, args }
    }

    /// Run the entry
    pub async fn invoke(&self, ctx: &Arc<ExecutionContext>) -> Result<JsonValue> {
        self.action.call(Arc::clone(ctx), self.args.clone()).await
    }

    fn dedup_key(&self) -> Result<(String, String)> {
        Ok((
            self.action.name().to_string(),
            serde_json::to_string(&self.args)?,
        ))
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("action", &self.action.name())
            .field("args", &self.args)
            .finish()
    }
}

type Queue = Arc<Mutex<VecDeque<Deferred>>>;

/// Every named queue of a run.
#[derive(Default)]
pub struct HookQueues {
    queues: DashMap<String, Queue>,
}

impl HookQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Queue {
        Arc::clone(self.queues.entry(name.to_string()).or_default().value())
    }

    fn existing(&self, name: &str) -> Option<Queue> {
        self.queues.get(name).map(|q| Arc::clone(q.value()))
    }

    /// Append an action to a queue, creating the queue if needed
    pub fn enqueue(&self, name: &str, action: Arc<dyn DeferredAction>, args: Vec<JsonValue>) {
        trace!("Enqueue {} {:?} on {}", action.name(), args, name);
        self.queue(name).lock().push_back(Deferred::new(action, args));
    }

    /// Remove and return the head of a queue
    pub fn pop(&self, name: &str) -> Option<Deferred> {
        self.existing(name)?.lock().pop_front()
    }

    /// Number of pending entries
    pub fn len(&self, name: &str) -> usize {
        self.existing(name).map_or(0, |q| q.lock().len())
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }

    /// Drop every pending entry of a queue
    pub fn clear(&self, name: &str) {
        if let Some(queue) = self.existing(name) {
            queue.lock().clear();
        }
    }

    /// Names of every queue created so far
    pub fn names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    /// Pop and run entries until the queue is empty.
    ///
    /// Entries enqueued while the drain is running are picked up by the same
    /// pass. An action error stops the drain and is returned as is; entries
    /// behind it stay queued.
    pub async fn drain(&self, name: &str, ctx: &Arc<ExecutionContext>) -> Result<Vec<JsonValue>> {
        let Some(queue) = self.existing(name) else {
            return Ok(Vec::new());
        };

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut results = Vec::new();

        loop {
            // Release the queue lock before awaiting so actions may enqueue.
            let next = queue.lock().pop_front();
            let Some(entry) = next else { break };

            let key = entry.dedup_key()?;
            if seen.contains(&key) {
                debug!(
                    "Skipping duplicate deferred action {} {} on {}",
                    key.0, key.1, name
                );
                continue;
            }

            debug!("Running deferred action {} {} from {}", key.0, key.1, name);
            match entry.invoke(ctx).await {
                Ok(value) => results.push(value),
                Err(e) => {
                    error!("Deferred action {} from {} failed: {}", key.0, name, e);
                    return Err(e);
                }
            }
            seen.insert(key);
        }

        Ok(results)
    }
}

/// Queue an action on any named queue
pub fn add_hook(
    ctx: &ExecutionContext,
    name: &str,
    action: Arc<dyn DeferredAction>,
    args: Vec<JsonValue>,
) {
    ctx.hooks().enqueue(name, action, args);
}

/// Queue an action to run before the next cohort
pub fn add_pre_hook(ctx: &ExecutionContext, action: Arc<dyn DeferredAction>, args: Vec<JsonValue>) {
    add_hook(ctx, PRE_HOOK, action, args);
}

/// Queue an action to run after the current cohort
pub fn add_post_hook(ctx: &ExecutionContext, action: Arc<dyn DeferredAction>, args: Vec<JsonValue>) {
    add_hook(ctx, POST_HOOK, action, args);
}

/// Drain a named queue
pub async fn run_hook(ctx: &Arc<ExecutionContext>, name: &str) -> Result<Vec<JsonValue>> {
    ctx.hooks().drain(name, ctx).await
}

pub async fn run_pre_hook(ctx: &Arc<ExecutionContext>) -> Result<Vec<JsonValue>> {
    run_hook(ctx, PRE_HOOK).await
}

pub async fn run_post_hook(ctx: &Arc<ExecutionContext>) -> Result<Vec<JsonValue>> {
    run_hook(ctx, POST_HOOK).await
}
