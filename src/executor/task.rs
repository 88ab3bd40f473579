//! Tasks and task middleware for Drover
//!
//! This module provides:
//! - The [`Task`] trait and [`FnTask`] closure adapter
//! - [`TaskCall`], the per-invocation context threaded through every call
//! - [`Hooked`], which fires a pre hook once before a cohort and a post hook
//!   once after it
//! - [`Locked`], which serializes invocations on a named lock
//! - [`Detached`] and [`Synced`], the task forms of `dispatch` and `sync`
//! - [`TaskBuilder`], which composes the layers in an explicit order
//!
//! # Cohorts and nesting
//!
//! A cohort is one fan-out of a task over `cohort_size` targets. The outermost
//! hooked task of a call chain owns the cohort: its pre hook fires before the
//! first body runs, its post hook after the last body completes. A hooked task
//! invoked from inside another hooked task's body sees the parent marker on
//! its [`TaskCall`] and runs its body without firing its own hooks.
//!
//! ```rust,ignore
//! let deploy = TaskBuilder::new(task("deploy", |call| async move {
//!         connection::run(&call.ctx, &runner, &call.target, "make install", ExecuteOptions::new()).await?;
//!         Ok(JsonValue::Null)
//!     }))
//!     .with_lock()
//!     .with_hooks(Some(Hook::queue(PRE_HOOK)), Some(Hook::queue(POST_HOOK)))
//!     .build();
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info_span, trace, warn, Instrument};

use crate::error::{Error, Result};
use crate::executor::async_task::{dispatch, sync, Dispatched};
use crate::executor::runtime::ExecutionContext;
use crate::handlers::{self, DeferredAction};

/// Per-invocation context.
#[derive(Clone)]
pub struct TaskCall {
    /// The shared run context
    pub ctx: Arc<ExecutionContext>,
    /// Target this invocation works on
    pub target: String,
    /// Number of invocations in the cohort
    pub cohort_size: usize,
    /// Name of the outermost hooked task, once one is running
    parent: Option<Arc<str>>,
}

impl std::fmt::Debug for TaskCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCall")
            .field("target", &self.target)
            .field("cohort_size", &self.cohort_size)
            .field("parent", &self.parent)
            .finish()
    }
}

impl TaskCall {
    /// A top-level call
    pub fn new(ctx: Arc<ExecutionContext>, target: impl Into<String>, cohort_size: usize) -> Self {
        Self {
            ctx,
            target: target.into(),
            cohort_size,
            parent: None,
        }
    }

    /// The same call aimed at another target
    pub fn for_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }

    /// Name of the outermost hooked task, if any
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Whether an outer hooked task is already running
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// The call a hooked task hands to its own body
    fn within(&self, task_name: &str) -> Self {
        let mut call = self.clone();
        if call.parent.is_none() {
            call.parent = Some(Arc::from(task_name));
        }
        call
    }
}

/// A unit of work run against one target.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, call: TaskCall) -> Result<JsonValue>;
}

#[async_trait]
impl<T: Task + ?Sized> Task for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        (**self).run(call).await
    }
}

/// Adapts a closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        (self.f)(call).await
    }
}

/// Build a task from a closure
pub fn task<F, Fut>(name: impl Into<String>, f: F) -> FnTask<F>
where
    F: Fn(TaskCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue>> + Send,
{
    FnTask {
        name: name.into(),
        f,
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// An action with bound arguments, fired around a cohort.
#[derive(Clone)]
pub struct Hook {
    action: Arc<dyn DeferredAction>,
    args: Vec<JsonValue>,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("action", &self.action.name())
            .field("args", &self.args)
            .finish()
    }
}

impl Hook {
    pub fn new(action: Arc<dyn DeferredAction>, args: Vec<JsonValue>) -> Self {
        Self { action, args }
    }

    /// A hook that drains the named deferred-action queue
    pub fn queue(name: &str) -> Self {
        let queue = name.to_string();
        let action = handlers::action(format!("drain:{}", name), move |ctx, _args| {
            let queue = queue.clone();
            async move {
                let results = handlers::run_hook(&ctx, &queue).await?;
                Ok::<_, Error>(JsonValue::Array(results))
            }
        });
        Self::new(action, Vec::new())
    }

    pub fn name(&self) -> &str {
        self.action.name()
    }

    /// Run the action with its bound arguments
    pub async fn fire(&self, ctx: &Arc<ExecutionContext>) -> Result<JsonValue> {
        self.action.call(Arc::clone(ctx), self.args.clone()).await
    }
}

/// Where a hooked task is within its current cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// No invocation of the cohort has started
    Idle,
    /// The pre hook ran
    PreFired,
    /// Bodies are running
    Running,
    /// The last body completed and the post hook is firing
    PostFired,
    /// The cohort is finished; the next outermost call opens a new one
    Done,
}

#[derive(Debug, Default)]
struct Cohort {
    started: usize,
    completed: usize,
    /// Bumped on every reset; calls from an older cohort are ignored
    generation: u64,
}

/// Fires a pre hook before a cohort's first body and a post hook after its
/// last.
///
/// Bodies that fail with [`Error::Execution`] are logged and count as
/// completed so the cohort carries on; [`Error::Terminated`] is swallowed the
/// same way. Any other error aborts the cohort: it propagates, the post hook
/// does not fire, and the next call starts a fresh cohort. Invocations of the
/// aborted cohort still in flight finish without touching the new one.
pub struct Hooked<T> {
    inner: T,
    pre: Option<Hook>,
    post: Option<Hook>,
    cohort: AsyncMutex<Cohort>,
    state: watch::Sender<HookState>,
}

impl<T: Task> Hooked<T> {
    pub fn new(inner: T, pre: Option<Hook>, post: Option<Hook>) -> Self {
        let (state, _) = watch::channel(HookState::Idle);
        Self {
            inner,
            pre,
            post,
            cohort: AsyncMutex::new(Cohort::default()),
            state,
        }
    }

    /// Current cohort state
    pub fn state(&self) -> HookState {
        *self.state.borrow()
    }

    /// Follow state changes, including those made while a hook is firing
    pub fn subscribe(&self) -> watch::Receiver<HookState> {
        self.state.subscribe()
    }

    /// Invocations of the current cohort that have started
    pub async fn started(&self) -> usize {
        self.cohort.lock().await.started
    }

    fn set_state(&self, state: HookState) {
        self.state.send_replace(state);
    }

    fn reset(&self, cohort: &mut Cohort) {
        cohort.started = 0;
        cohort.completed = 0;
        cohort.generation += 1;
        self.set_state(HookState::Idle);
    }

    /// Join the current cohort, firing the pre hook for its first call.
    /// Returns the cohort generation the call belongs to.
    async fn enter_cohort(&self, call: &TaskCall) -> Result<u64> {
        let mut cohort = self.cohort.lock().await;
        if self.state() == HookState::Done {
            self.reset(&mut cohort);
        }
        cohort.started += 1;

        if cohort.started == 1 {
            // Held across the hook so no body of this cohort starts before it.
            if let Some(pre) = &self.pre {
                debug!("Running pre hook {} for {}", pre.name(), self.name());
                if let Err(e) = pre.fire(&call.ctx).await {
                    self.reset(&mut cohort);
                    return Err(e);
                }
            }
            self.set_state(HookState::PreFired);
        }
        self.set_state(HookState::Running);
        Ok(cohort.generation)
    }

    async fn leave_cohort(&self, call: &TaskCall, generation: u64) -> Result<()> {
        let mut cohort = self.cohort.lock().await;
        if cohort.generation != generation {
            trace!("{}: invocation of an aborted cohort finished", self.name());
            return Ok(());
        }
        cohort.completed += 1;
        trace!(
            "{}: {}/{} invocations complete",
            self.name(),
            cohort.completed,
            call.cohort_size
        );

        if cohort.completed >= call.cohort_size.max(1) {
            self.set_state(HookState::PostFired);
            if let Some(post) = &self.post {
                debug!("Running post hook {} for {}", post.name(), self.name());
                if let Err(e) = post.fire(&call.ctx).await {
                    self.reset(&mut cohort);
                    return Err(e);
                }
            }
            self.set_state(HookState::Done);
        }
        Ok(())
    }

    async fn abort_cohort(&self, generation: u64) {
        let mut cohort = self.cohort.lock().await;
        if cohort.generation != generation {
            trace!("{}: cohort already replaced, nothing to abort", self.name());
            return;
        }
        warn!("Cohort for {} aborted", self.name());
        self.reset(&mut cohort);
    }
}

#[async_trait]
impl<T: Task> Task for Hooked<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        let span = info_span!("task", name = %self.name(), target = %call.target);

        async move {
            if call.is_nested() {
                trace!(
                    "{} runs inside {}; hooks suppressed",
                    self.name(),
                    call.parent().unwrap_or_default()
                );
                return absorb(self.name(), &call.target, self.inner.run(call.clone()).await);
            }

            let generation = self.enter_cohort(&call).await?;

            let body_call = call.within(self.name());
            let outcome = absorb(self.name(), &call.target, self.inner.run(body_call).await);
            let value = match outcome {
                Ok(value) => value,
                Err(e) => {
                    self.abort_cohort(generation).await;
                    return Err(e);
                }
            };

            self.leave_cohort(&call, generation).await?;
            Ok(value)
        }
        .instrument(span)
        .await
    }
}

/// Log and swallow the errors a cohort survives.
fn absorb(task: &str, target: &str, outcome: Result<JsonValue>) -> Result<JsonValue> {
    match outcome {
        Err(e @ Error::Execution { .. }) => {
            error!("{}: {}", task, e);
            Ok(JsonValue::Null)
        }
        Err(Error::Terminated(name)) => {
            debug!("{}: {} terminated", target, name);
            Ok(JsonValue::Null)
        }
        other => other,
    }
}

/// Returns a function that wraps a task with the given hooks
pub fn decorate_with_hooks<T: Task>(
    pre: Option<Hook>,
    post: Option<Hook>,
) -> impl FnOnce(T) -> Hooked<T> {
    move |task| Hooked::new(task, pre, post)
}

// ============================================================================
// Locking
// ============================================================================

/// Serializes invocations on a named lock, by default the task's own name.
pub struct Locked<T> {
    inner: T,
    lock_name: String,
}

impl<T: Task> Locked<T> {
    pub fn new(inner: T) -> Self {
        let lock_name = inner.name().to_string();
        Self { inner, lock_name }
    }

    /// Lock on an explicit name, shared with anything else using it
    pub fn named(inner: T, lock_name: impl Into<String>) -> Self {
        Self {
            inner,
            lock_name: lock_name.into(),
        }
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }
}

#[async_trait]
impl<T: Task> Task for Locked<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        let _section = call.ctx.mutexes().acquire(&self.lock_name).await;
        self.inner.run(call).await
    }
}

// ============================================================================
// Dispatch layers
// ============================================================================

/// Runs the inner task on its own tokio task in parallel mode.
///
/// In parallel mode `run` returns `Null` as soon as the work is spawned; the
/// inner task's own result is only logged. Use [`Synced`] or
/// [`crate::executor::async_task::sync`] to wait for it. With parallel mode
/// off the inner task runs in place and its result is returned.
pub struct Detached {
    inner: Arc<dyn Task>,
}

impl Detached {
    pub fn new(inner: Arc<dyn Task>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Task for Detached {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        let inner = Arc::clone(&self.inner);
        let ctx = Arc::clone(&call.ctx);
        let target = call.target.clone();
        let work = async move {
            let name = inner.name().to_string();
            let outcome = inner.run(call).await;
            if let Err(e) = &outcome {
                error!("{}: detached {} failed: {}", target, name, e);
            }
            outcome
        };

        match dispatch(&ctx, self.name(), work).await {
            Dispatched::Spawned { .. } => Ok(JsonValue::Null),
            Dispatched::Completed(outcome) => outcome,
        }
    }
}

/// Waits for every dispatched unit to finish before running the inner task.
pub struct Synced<T> {
    inner: T,
}

impl<T: Task> Synced<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Task> Task for Synced<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, call: TaskCall) -> Result<JsonValue> {
        let ctx = Arc::clone(&call.ctx);
        sync(&ctx, self.inner.run(call)).await
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Composes middleware around a task, innermost first.
///
/// `TaskBuilder::new(t).with_async().with_lock().with_hooks(pre, post).build()`
/// produces `Hooked(Locked(Detached(t)))`. Consecutive hook calls merge into
/// one hook layer.
pub struct TaskBuilder {
    task: Arc<dyn Task>,
    pre: Option<Hook>,
    post: Option<Hook>,
}

impl TaskBuilder {
    pub fn new<T: Task + 'static>(task: T) -> Self {
        Self {
            task: Arc::new(task),
            pre: None,
            post: None,
        }
    }

    fn flush_hooks(mut self) -> Self {
        if self.pre.is_some() || self.post.is_some() {
            let hooked = Hooked::new(Arc::clone(&self.task), self.pre.take(), self.post.take());
            self.task = Arc::new(hooked);
        }
        self
    }

    /// Serialize on the task's own name
    pub fn with_lock(self) -> Self {
        let mut this = self.flush_hooks();
        this.task = Arc::new(Locked::new(Arc::clone(&this.task)));
        this
    }

    /// Serialize on an explicit name
    pub fn with_named_lock(self, name: impl Into<String>) -> Self {
        let mut this = self.flush_hooks();
        this.task = Arc::new(Locked::named(Arc::clone(&this.task), name));
        this
    }

    /// Run on its own tokio task in parallel mode
    pub fn with_async(self) -> Self {
        let mut this = self.flush_hooks();
        this.task = Arc::new(Detached::new(Arc::clone(&this.task)));
        this
    }

    /// Wait for all dispatched work before each run
    pub fn with_sync(self) -> Self {
        let mut this = self.flush_hooks();
        this.task = Arc::new(Synced::new(Arc::clone(&this.task)));
        this
    }

    /// Fire `pre` before and `post` after each cohort
    pub fn with_hooks(mut self, pre: Option<Hook>, post: Option<Hook>) -> Self {
        if pre.is_some() {
            self.pre = pre;
        }
        if post.is_some() {
            self.post = post;
        }
        self
    }

    pub fn with_pre_hook(self, hook: Hook) -> Self {
        self.with_hooks(Some(hook), None)
    }

    pub fn with_post_hook(self, hook: Hook) -> Self {
        self.with_hooks(None, Some(hook))
    }

    pub fn build(self) -> Arc<dyn Task> {
        self.flush_hooks().task
    }
}
