//! Fire-and-forget dispatch and the `sync` barrier
//!
//! - [`dispatch`] runs a future on its own tokio task when the context is in
//!   parallel mode and hands back a handle; otherwise it awaits the future in
//!   place and hands back the value.
//! - [`sync`] waits until every dispatched unit of the run has finished, then
//!   runs its future. The barrier is process-wide: it waits for all
//!   outstanding work, not only the work a particular caller spawned.
//!
//! ```rust,ignore
//! let a = dispatch(&ctx, "build_web", build(web)).await;
//! let b = dispatch(&ctx, "build_db", build(db)).await;
//! sync(&ctx, announce()).await; // runs once both builds are done
//! ```
//!
//! Outstanding work is counted, not polled: the barrier sleeps on a watch
//! channel until the count drops back to its baseline.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::executor::runtime::ExecutionContext;

tokio::task_local! {
    static DISPATCHED: bool;
}

/// Counts dispatched units that have not finished yet.
#[derive(Clone)]
pub struct AsyncTracker {
    count: Arc<watch::Sender<usize>>,
}

impl Default for AsyncTracker {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }
}

/// Decrements the tracker when the unit ends, however it ends.
struct Outstanding {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl AsyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dispatched units still running
    pub fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    /// Spawn a tracked unit of work
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.count.send_modify(|n| *n += 1);
        let outstanding = Outstanding {
            count: Arc::clone(&self.count),
        };

        tokio::spawn(DISPATCHED.scope(true, async move {
            let _outstanding = outstanding;
            fut.await
        }))
    }

    /// Wait until no other dispatched unit is running.
    ///
    /// Called from inside a dispatched unit, the caller itself is the baseline
    /// and is not waited for. Two dispatched units waiting on each other this
    /// way never finish.
    pub async fn wait_idle(&self) {
        let baseline = usize::from(in_dispatched_unit());
        let mut rx = self.count.subscribe();
        trace!(
            "Waiting for dispatched work: {} outstanding, baseline {}",
            *rx.borrow(),
            baseline
        );
        match rx.wait_for(|n| *n <= baseline).await {
            Ok(_) => trace!("Dispatched work settled at {}", baseline),
            Err(e) => trace!("Dispatch tracker closed while waiting: {}", e),
        };
    }
}

/// Whether the current code runs inside a dispatched unit
pub fn in_dispatched_unit() -> bool {
    DISPATCHED.try_with(|d| *d).unwrap_or(false)
}

/// Outcome of [`dispatch`].
#[derive(Debug)]
pub enum Dispatched<T> {
    /// Running on its own task
    Spawned { name: String, handle: JoinHandle<T> },
    /// Parallel mode was off; the future already ran
    Completed(T),
}

impl<T> Dispatched<T> {
    pub fn is_spawned(&self) -> bool {
        matches!(self, Dispatched::Spawned { .. })
    }

    /// Wait for the value, whichever way the work ran
    pub async fn join(self) -> Result<T> {
        match self {
            Dispatched::Spawned { name, handle } => handle.await.map_err(|e| Error::Join {
                task: name,
                message: e.to_string(),
            }),
            Dispatched::Completed(value) => Ok(value),
        }
    }
}

/// Run `fut` on its own task in parallel mode, in place otherwise.
pub async fn dispatch<F>(ctx: &ExecutionContext, name: &str, fut: F) -> Dispatched<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    if ctx.parallel() {
        debug!("Dispatching {} asynchronously", name);
        Dispatched::Spawned {
            name: name.to_string(),
            handle: ctx.tracker().spawn(fut),
        }
    } else {
        debug!("Avoid async action for {} due to parallel = false", name);
        Dispatched::Completed(fut.await)
    }
}

/// Wait for all dispatched work, then run `fut`.
pub async fn sync<F>(ctx: &ExecutionContext, fut: F) -> F::Output
where
    F: Future,
{
    ctx.tracker().wait_idle().await;
    fut.await
}
