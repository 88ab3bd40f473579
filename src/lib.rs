//! # Drover - Idempotent Orchestration for Remote Targets
//!
//! Drover runs ordinary async Rust functions ("tasks") against a list of
//! targets and gives them the pieces provisioning scripts keep reinventing:
//! ensure-style resource reconciliation, deferred side effects that coalesce,
//! hooks around a fan-out, scoped execution flags, and small concurrency
//! primitives. All of it hangs off one shared execution context.
//!
//! ## Core Concepts
//!
//! - **Execution context**: the one object every component shares: flags,
//!   targets and roles, hook queues, named locks, dispatched-work tracker
//! - **Tasks**: async units of work run once per target
//! - **Cohorts**: one fan-out of a task over its targets; hooked tasks fire a
//!   pre hook before the first invocation and a post hook after the last
//! - **Deferred actions**: side effects queued on a named queue and drained
//!   later, with duplicates skipped
//! - **Scoped flags**: `mode_local`, `mode_sudo` and friends, restored on
//!   every exit path
//! - **Ensure**: find-or-create of a declared resource, keyed by tags
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Cohort Executor                             │
//! │          (pre_hook drain → task × targets → post_hook drain)         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │  Task layers    │   │  Deferred actions   │   │  Concurrency        │
//! │  (Hooked,       │   │  (named FIFO        │   │  (dispatch, sync,   │
//! │   Locked)       │   │   queues + dedup)   │   │   named locks)      │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Execution Context                             │
//! │        (flags, targets/roles, log level, shared components)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                  ┌─────────────────┴─────────────────┐
//!                  ▼                                   ▼
//! ┌─────────────────────────────────┐ ┌─────────────────────────────────┐
//! │         Command runners         │ │        Resource clients          │
//! │     (local, or your transport)  │ │   (ensure: find/create/tag)      │
//! └─────────────────────────────────┘ └─────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use drover::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let ctx = ExecutionContext::shared();
//!     ctx.set_targets(["10.0.0.1", "10.0.0.2"]);
//!     let runner: Arc<dyn CommandRunner> = Arc::new(LocalRunner::new());
//!
//!     let r = Arc::clone(&runner);
//!     let deploy = TaskBuilder::new(task("deploy", move |call| {
//!         let runner = Arc::clone(&r);
//!         async move {
//!             run(&call.ctx, runner.as_ref(), &call.target, "make install", ExecuteOptions::new()).await?;
//!             service_restart(&call.ctx, Arc::clone(&runner), &call.target, "nginx");
//!             Ok(serde_json::Value::Null)
//!         }
//!     }))
//!     .with_lock()
//!     .build();
//!
//!     // nginx restarts once per host, after every deploy has finished
//!     Executor::new(ctx).execute_on_all(deploy).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and functions.
    //!
    //! ```rust,ignore
    //! use drover::prelude::*;
    //! ```

    pub use std::sync::Arc;

    // Error handling
    pub use crate::error::{Error, ErrorContext, Result};

    // Configuration and output
    pub use crate::config::{Config, Credentials};
    pub use crate::output::{init_logging, LogLevel, Severity};

    // Execution engine
    pub use crate::executor::async_task::{dispatch, sync, Dispatched};
    pub use crate::executor::runtime::ExecutionContext;
    pub use crate::executor::task::{
        decorate_with_hooks, task, Detached, Hook, HookState, Hooked, Locked, Synced, Task,
        TaskBuilder, TaskCall,
    };
    pub use crate::executor::throttle::with_lock;
    pub use crate::executor::Executor;

    // Flags
    pub use crate::switch::{is_local, is_sudo, Switch, MODE_LOCAL, MODE_SUDO};

    // Deferred actions
    pub use crate::handlers::{
        action, add_hook, add_post_hook, add_pre_hook, run_hook, DeferredAction, POST_HOOK,
        PRE_HOOK,
    };

    // Connections
    pub use crate::connection::{
        run, sudo, CommandResult, CommandRunner, ExecuteOptions, LocalRunner,
    };

    // Reconciliation
    pub use crate::cloud::{
        ensure, EnsureOptions, Ensured, Identity, Readiness, Resource, ResourceClient,
    };

    // Modules
    pub use crate::modules::service::{
        service_ensure, service_reload, service_restart, service_start, service_stop,
    };
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Drover operations.
///
/// The [`Error`](error::Error) enum separates execution failures, which the
/// hooked-task boundary absorbs, from everything that must reach the caller.
pub mod error;

/// Configuration loading.
///
/// Layered TOML/YAML/JSON files plus `DROVER_*` environment overrides, and
/// eager cloud credential loading.
pub mod config;

/// Log channel setup and the enabled severity set.
pub mod output;

// ============================================================================
// Execution
// ============================================================================

/// Execution engine: context, tasks, hook wrapper, locks, dispatch and the
/// cohort executor.
pub mod executor;

/// Scoped flags that restore their previous value on every exit path.
pub mod switch;

/// Named queues of deferred actions, drained FIFO with duplicates skipped.
///
/// Tasks use these to ask for a side effect (restart a service, flush a
/// cache) many times and have it happen once, later.
pub mod handlers;

// ============================================================================
// Infrastructure
// ============================================================================

/// Command runners and the flag-aware `run` wrapper.
pub mod connection;

/// Idempotent resource reconciliation (`ensure`).
pub mod cloud;

/// Built-in modules.
pub mod modules;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
