//! Integration tests for scoped flags and the commands they steer
//!
//! Tests cover:
//! - `mode_local` and `mode_sudo` changing how `run` reaches the runner
//! - Restoration after a scope ends, including early error returns
//! - Non-zero exits and forced commands
//! - Service actions coalescing through a cohort

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;

use common::*;
use drover::connection::{self, CommandRunner, ExecuteOptions, LOCALHOST};
use drover::error::{Error, Result};
use drover::executor::runtime::ExecutionContext;
use drover::executor::task::{task, TaskCall};
use drover::executor::Executor;
use drover::modules::service::{service_ensure, service_restart, service_stop};
use drover::switch::{is_local, is_sudo, set_sudo_password, Switch, MODE_LOCAL, MODE_SUDO};

#[tokio::test]
async fn test_plain_run_reaches_the_target() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new();

    connection::run(&ctx, &runner, "web1", "uptime", ExecuteOptions::new())
        .await
        .unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, "web1");
    assert!(!calls[0].escalate);
}

#[tokio::test]
async fn test_mode_local_redirects_to_localhost() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new();

    {
        let _local = MODE_LOCAL.enter(&ctx);
        assert!(is_local(&ctx));
        connection::run(&ctx, &runner, "web1", "hostname", ExecuteOptions::new())
            .await
            .unwrap();
    }
    assert!(!is_local(&ctx));
    connection::run(&ctx, &runner, "web1", "hostname", ExecuteOptions::new())
        .await
        .unwrap();

    let targets: Vec<String> = runner.calls().into_iter().map(|c| c.target).collect();
    assert_eq!(targets, vec![LOCALHOST, "web1"]);
}

#[tokio::test]
async fn test_mode_sudo_escalates_with_stored_password() {
    let ctx = ExecutionContext::new();
    set_sudo_password(&ctx, "hunter2");
    let runner = MockRunner::new();

    {
        let _sudo = MODE_SUDO.enter(&ctx);
        connection::run(&ctx, &runner, "db1", "apt-get update", ExecuteOptions::new())
            .await
            .unwrap();
    }
    connection::run(&ctx, &runner, "db1", "whoami", ExecuteOptions::new())
        .await
        .unwrap();

    let calls = runner.calls();
    assert!(calls[0].escalate);
    assert_eq!(calls[0].password.as_deref(), Some("hunter2"));
    assert!(!calls[1].escalate);
    assert_eq!(calls[1].password, None);
}

#[tokio::test]
async fn test_sudo_escalates_without_touching_the_flag() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new();

    connection::sudo(&ctx, &runner, "db1", "systemctl daemon-reload", ExecuteOptions::new())
        .await
        .unwrap();

    assert!(runner.calls()[0].escalate);
    assert!(!is_sudo(&ctx));
}

#[tokio::test]
async fn test_flag_restored_after_error_return() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new().fail_on("false", 1, "");

    async fn locally(ctx: &ExecutionContext, runner: &dyn CommandRunner) -> Result<()> {
        let _local = MODE_LOCAL.enter(ctx);
        connection::run(ctx, runner, "web1", "false", ExecuteOptions::new()).await?;
        Ok(())
    }

    assert!(locally(&ctx, &runner).await.is_err());
    assert!(!is_local(&ctx));
    assert!(ctx.current_flag(MODE_LOCAL.key).is_none());
}

#[tokio::test]
async fn test_nested_scopes_restore_outer_value() {
    let ctx = ExecutionContext::new();
    let batch = Switch::new("batch_size", 10);

    let outer = batch.enter(&ctx);
    {
        let _inner = batch.enter_with(&ctx, 2);
        assert_eq!(Switch::value_of(&ctx, "batch_size"), Some(JsonValue::from(2)));
    }
    assert_eq!(Switch::value_of(&ctx, "batch_size"), Some(JsonValue::from(10)));
    drop(outer);
    assert_eq!(Switch::value_of(&ctx, "batch_size"), None);
}

// ============================================================================
// Command results
// ============================================================================

#[tokio::test]
async fn test_nonzero_exit_is_an_execution_error() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new().fail_on("apt-get install nginx", 100, "E: locked");

    let err = connection::run(&ctx, &runner, "web1", "apt-get install nginx", ExecuteOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_execution());
    assert_eq!(
        err.to_string(),
        "web1: failed to run 'apt-get install nginx' (retcode:100): 'E: locked'"
    );
}

#[tokio::test]
async fn test_forced_command_returns_failure() {
    let ctx = ExecutionContext::new();
    let runner = MockRunner::new().fail_on("test -f /etc/app.conf", 1, "");

    let result = connection::run(
        &ctx,
        &runner,
        "web1",
        "test -f /etc/app.conf",
        ExecuteOptions::new().with_force(),
    )
    .await
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn test_run_all_follows_targets() {
    let ctx = ExecutionContext::new();
    ctx.set_targets(hosts(3));
    let runner = MockRunner::new();

    let results = connection::run_all(&ctx, &runner, "uptime", ExecuteOptions::new())
        .await
        .unwrap();
    assert_eq!(results.keys().cloned().collect::<Vec<_>>(), hosts(3));

    let _local = MODE_LOCAL.enter(&ctx);
    let results = connection::run_all(&ctx, &runner, "uptime", ExecuteOptions::new())
        .await
        .unwrap();
    assert_eq!(results.keys().collect::<Vec<_>>(), vec![LOCALHOST]);
}

// ============================================================================
// Services through a cohort
// ============================================================================

#[tokio::test]
async fn test_service_restart_runs_once_per_target_after_cohort() {
    let ctx = ExecutionContext::shared();
    let runner = Arc::new(MockRunner::new());
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();

    let configure = task("configure", move |call: TaskCall| {
        let runner = Arc::clone(&dyn_runner);
        async move {
            connection::run(&call.ctx, runner.as_ref(), &call.target, "render nginx.conf", ExecuteOptions::new())
                .await?;
            // Two edits, one restart.
            service_restart(&call.ctx, Arc::clone(&runner), &call.target, "nginx");
            service_restart(&call.ctx, Arc::clone(&runner), &call.target, "nginx");
            Ok::<_, Error>(JsonValue::Null)
        }
    });

    Executor::new(Arc::clone(&ctx))
        .execute(Arc::new(configure), &hosts(2))
        .await
        .unwrap();

    assert_eq!(
        runner.commands(),
        vec![
            "render nginx.conf",
            "render nginx.conf",
            "service nginx restart",
            "service nginx restart",
        ]
    );
    let restarts: Vec<(String, bool)> = runner
        .calls()
        .into_iter()
        .filter(|c| c.command == "service nginx restart")
        .map(|c| (c.target, c.escalate))
        .collect();
    assert_eq!(
        restarts,
        vec![("host1".to_string(), true), ("host2".to_string(), true)]
    );
}

#[tokio::test]
async fn test_service_stop_queues_stop() {
    let ctx = ExecutionContext::shared();
    let runner = Arc::new(MockRunner::new());

    service_stop(&ctx, runner.clone(), "web1", "redis");
    drover::handlers::run_post_hook(&ctx).await.unwrap();

    assert_eq!(runner.commands(), vec!["service redis stop"]);
}

#[tokio::test]
async fn test_service_ensure_only_starts_stopped_service() {
    let ctx = ExecutionContext::shared();
    let runner = Arc::new(MockRunner::new().fail_on("service redis status", 3, "redis is stopped"));

    assert!(!service_ensure(&ctx, runner.clone(), "web1", "nginx").await.unwrap());
    assert!(service_ensure(&ctx, runner.clone(), "web1", "redis").await.unwrap());
    drover::handlers::run_post_hook(&ctx).await.unwrap();

    assert_eq!(
        runner.commands(),
        vec![
            "service nginx status",
            "service redis status",
            "service redis start",
        ]
    );
}
