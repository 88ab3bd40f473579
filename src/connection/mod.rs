//! Command execution for Drover
//!
//! A [`CommandRunner`] executes one shell command on one target. Transport is
//! the runner's business: SSH, an agent, a cloud API or, with [`LocalRunner`],
//! the local machine.
//!
//! [`run`] is what task bodies call. It reads the scoped flags from the
//! execution context before handing the command to the runner:
//!
//! - `mode_local` redirects the command to `localhost`
//! - `mode_sudo` runs it escalated, with the context's sudo password
//! - a non-zero exit becomes [`Error::Execution`] unless `force` is set

pub mod local;

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::runtime::ExecutionContext;
use crate::switch::{is_local, is_sudo, sudo_password};

pub use local::LocalRunner;

/// Target name used in local mode.
pub const LOCALHOST: &str = "localhost";

/// Errors raised by a runner before the command produced an exit code.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to reach the target.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The command could not be started or awaited.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// The command did not finish in time.
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 indicates success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: true,
        }
    }

    pub fn failure(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// stdout and stderr joined by a newline, skipping empty streams
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Return the result instead of failing on a non-zero exit
    pub force: bool,
    /// Run with privilege escalation
    pub escalate: bool,
    /// Password fed to the escalation prompt
    pub escalate_password: Option<String>,
    /// Run on the local machine
    pub local: bool,
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Timeout in seconds
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_escalation(mut self, password: Option<String>) -> Self {
        self.escalate = true;
        self.escalate_password = password;
        self
    }

    pub fn with_local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fill in what the scoped flags ask for
    fn resolve(mut self, ctx: &ExecutionContext) -> Self {
        self.local |= is_local(ctx);
        self.escalate |= is_sudo(ctx);
        if self.escalate && self.escalate_password.is_none() {
            self.escalate_password = sudo_password(ctx);
        }
        self
    }
}

/// Executes shell commands on targets.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        target: &str,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult>;
}

/// Run a command on one target, honouring the scoped flags.
pub async fn run(
    ctx: &ExecutionContext,
    runner: &dyn CommandRunner,
    target: &str,
    command: &str,
    options: ExecuteOptions,
) -> Result<CommandResult> {
    let options = options.resolve(ctx);
    let target = if options.local { LOCALHOST } else { target };

    if options.escalate {
        info!("[{}] sudo: {}", target, command);
    } else {
        info!("[{}] run: {}", target, command);
    }

    let result = runner
        .run(target, command, &options)
        .await
        .map_err(|e| Error::connection_failed(target, e.to_string()))?;

    if !result.success && !options.force {
        return Err(Error::execution(
            target,
            command,
            result.exit_code,
            result.combined_output(),
        ));
    }
    debug!("[{}] exit code {}", target, result.exit_code);
    Ok(result)
}

/// Run a command escalated on one target.
pub async fn sudo(
    ctx: &ExecutionContext,
    runner: &dyn CommandRunner,
    target: &str,
    command: &str,
    options: ExecuteOptions,
) -> Result<CommandResult> {
    let password = options.escalate_password.clone();
    run(ctx, runner, target, command, options.with_escalation(password)).await
}

/// Run a command on every target of the context, in order.
///
/// In local mode the command runs once, on `localhost`.
pub async fn run_all(
    ctx: &ExecutionContext,
    runner: &dyn CommandRunner,
    command: &str,
    options: ExecuteOptions,
) -> Result<IndexMap<String, CommandResult>> {
    let targets = if options.local || is_local(ctx) {
        vec![LOCALHOST.to_string()]
    } else {
        ctx.targets()
    };

    let mut results = IndexMap::with_capacity(targets.len());
    for target in targets {
        let result = run(ctx, runner, &target, command, options.clone()).await?;
        results.insert(target, result);
    }
    Ok(results)
}
