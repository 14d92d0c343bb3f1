//! Shell runner - executes step commands as subprocesses

use crate::tools::{CommandLine, StepInvocation, StepRunner, ToolError, ToolOutput};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs invocations as child processes
///
/// Children are killed when the future running them is dropped, so an
/// interrupted stage never leaves its process behind.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell program used for `CommandLine::Shell`
    shell: String,

    /// Arguments placed before the command string
    shell_args: Vec<String>,
}

impl ShellRunner {
    /// Create a runner using `sh -c`
    pub fn new() -> Self {
        Self::with_shell("sh", vec!["-c".to_string()])
    }

    /// Create a runner using a specific shell, e.g. `bash -eo pipefail -c`
    pub fn with_shell(shell: impl Into<String>, shell_args: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            shell_args,
        }
    }

    #[cfg(test)]
    pub fn shell(&self) -> &str {
        &self.shell
    }

    fn command(&self, invocation: &StepInvocation) -> Command {
        let mut command = match &invocation.command {
            CommandLine::Shell(script) => {
                let mut command = Command::new(&self.shell);
                command.args(&self.shell_args).arg(script);
                command
            }
            CommandLine::Exec { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        };

        command
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.working_dir)
            .kill_on_drop(true);
        command
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    /// # Errors
    /// Returns `ToolError` if:
    /// - The process cannot be spawned
    /// - The process exits with a non-zero status
    /// - The invocation exceeds its timeout
    async fn run(&self, invocation: &StepInvocation) -> Result<ToolOutput, ToolError> {
        debug!(
            "Spawning {} in {}",
            invocation.command,
            invocation.working_dir.display()
        );

        let result = timeout(invocation.timeout, self.command(invocation).output())
            .await
            .map_err(|_| ToolError::Timeout(invocation.timeout.as_secs()))?;

        let output = result
            .map_err(|e| ToolError::Internal(format!("Failed to spawn process: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!("Process exited with code {}", code);
            return Err(ToolError::Exit {
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        debug!("Process returned {} bytes of output", stdout.len());

        Ok(ToolOutput { stdout, stderr })
    }
}
