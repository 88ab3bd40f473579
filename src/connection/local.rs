//! Local command runner
//!
//! Runs commands on the current machine through `sh -c`, ignoring the target
//! name. Escalation goes through `sudo -S` with the password on stdin.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, CommandRunner, ConnectionError, ConnectionResult, ExecuteOptions};

/// Runs commands on the current host.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = if options.escalate {
            let mut c = Command::new("sudo");
            if options.escalate_password.is_some() {
                c.arg("-S");
            }
            c.arg("--").arg("sh").arg("-c").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(&options.env);
        cmd.stdin(if options.escalate_password.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(
        &self,
        _target: &str,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult> {
        debug!(command = %command, "Executing local command");

        let mut child = self.build_command(command, options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        if let (true, Some(password)) = (options.escalate, options.escalate_password.as_ref()) {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(format!("{}\n", password).as_bytes())
                    .await
                    .map_err(|e| {
                        ConnectionError::ExecutionFailed(format!("Failed to write password: {}", e))
                    })?;
            }
        }

        let wait = child.wait_with_output();
        let output = match options.timeout {
            Some(secs) => tokio::time::timeout(std::time::Duration::from_secs(secs), wait)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))??,
            None => wait.await?,
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(exit_code = %exit_code, stdout_len = %stdout.len(), stderr_len = %stderr.len(), "Command completed");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }
}
