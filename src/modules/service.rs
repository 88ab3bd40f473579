//! Service module - coalesced service actions
//!
//! Starting, stopping, restarting or reloading a service is not done on the
//! spot. The escalated `service <name> <action>` command is queued on the
//! post-hook queue instead, so a service that ten tasks ask to restart during
//! one cohort is restarted once, after the cohort.
//!
//! Status checks run immediately.

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::info;

use crate::connection::{self, CommandRunner, ExecuteOptions};
use crate::error::{Error, Result};
use crate::executor::runtime::ExecutionContext;
use crate::handlers::{self, DeferredAction};

/// Identity of the deferred escalated command.
pub const SUDO_ACTION: &str = "sudo";

/// What to do with a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
    Status,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
            ServiceAction::Status => "status",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `service <name> <action>`
pub fn service_command(service: &str, action: ServiceAction) -> String {
    format!("service {} {}", service, action)
}

/// A deferred action running `args[1]` escalated on target `args[0]`
fn deferred_sudo(runner: Arc<dyn CommandRunner>) -> Arc<dyn DeferredAction> {
    handlers::action(SUDO_ACTION, move |ctx, args| {
        let runner = Arc::clone(&runner);
        async move {
            let (target, command) = match (
                args.first().and_then(JsonValue::as_str),
                args.get(1).and_then(JsonValue::as_str),
            ) {
                (Some(target), Some(command)) => (target.to_string(), command.to_string()),
                _ => {
                    return Err(Error::Internal(format!(
                        "malformed deferred sudo arguments: {:?}",
                        args
                    )))
                }
            };

            let result =
                connection::sudo(&ctx, runner.as_ref(), &target, &command, ExecuteOptions::new())
                    .await?;
            Ok(json!({
                "target": target,
                "command": command,
                "exit_code": result.exit_code,
                "stdout": result.stdout,
            }))
        }
    })
}

fn enqueue(
    ctx: &ExecutionContext,
    runner: Arc<dyn CommandRunner>,
    target: &str,
    service: &str,
    action: ServiceAction,
) {
    let command = service_command(service, action);
    handlers::add_post_hook(
        ctx,
        deferred_sudo(runner),
        vec![json!(target), json!(command)],
    );
    info!("[{}] service {} enqueued to {}", target, service, action);
}

/// Queue a service start
pub fn service_start(ctx: &ExecutionContext, runner: Arc<dyn CommandRunner>, target: &str, service: &str) {
    enqueue(ctx, runner, target, service, ServiceAction::Start);
}

/// Queue a service stop
pub fn service_stop(ctx: &ExecutionContext, runner: Arc<dyn CommandRunner>, target: &str, service: &str) {
    enqueue(ctx, runner, target, service, ServiceAction::Stop);
}

/// Queue a service restart
pub fn service_restart(ctx: &ExecutionContext, runner: Arc<dyn CommandRunner>, target: &str, service: &str) {
    enqueue(ctx, runner, target, service, ServiceAction::Restart);
}

/// Queue a service reload
pub fn service_reload(ctx: &ExecutionContext, runner: Arc<dyn CommandRunner>, target: &str, service: &str) {
    enqueue(ctx, runner, target, service, ServiceAction::Reload);
}

/// Whether the service reports itself running. Runs immediately.
pub async fn service_is_running(
    ctx: &ExecutionContext,
    runner: &dyn CommandRunner,
    target: &str,
    service: &str,
) -> Result<bool> {
    let command = service_command(service, ServiceAction::Status);
    let result = connection::sudo(ctx, runner, target, &command, ExecuteOptions::new().with_force()).await?;
    Ok(result.success)
}

/// Queue a start if the service is not running. Returns true if one was queued.
pub async fn service_ensure(
    ctx: &ExecutionContext,
    runner: Arc<dyn CommandRunner>,
    target: &str,
    service: &str,
) -> Result<bool> {
    if service_is_running(ctx, runner.as_ref(), target, service).await? {
        return Ok(false);
    }
    service_start(ctx, runner, target, service);
    Ok(true)
}
