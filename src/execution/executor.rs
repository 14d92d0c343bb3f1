//! Step executor - turns a step into a tool invocation and runs it

use crate::{
    core::{workspace_relative, ExecutionContext, PipelineError, Step, StepAction},
    tools::{CommandLine, StepInvocation, StepRunner, ToolOutput},
};
use std::path::PathBuf;
use tracing::{debug, error, info};

/// Executes single steps through a [`StepRunner`]
pub struct StepExecutor<S> {
    runner: S,
}

impl<S: StepRunner> StepExecutor<S> {
    pub fn new(runner: S) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &S {
        &self.runner
    }

    /// Execute a step of `stage` and return its (masked) output
    ///
    /// `extra_env` is added on top of the context's step environment.
    pub async fn execute(
        &self,
        stage: &str,
        step: &Step,
        context: &ExecutionContext,
        extra_env: &[(String, String)],
    ) -> Result<ToolOutput, PipelineError> {
        info!("Executing step: {} / {}", stage, step.name);

        let invocation = self.invocation(stage, step, context, extra_env)?;
        debug!("Invocation for step {}: {}", step.name, context.mask(&invocation.command.to_string()));

        match self.runner.run(&invocation).await {
            Ok(output) => Ok(ToolOutput {
                stdout: context.mask(&output.stdout),
                stderr: context.mask(&output.stderr),
            }),
            Err(e) => {
                let message = context.mask(&format!("step '{}' {}", step.name, e));
                error!("Stage {} failed: {}", stage, message);
                Err(PipelineError::StageExecution {
                    stage: stage.to_string(),
                    message,
                })
            }
        }
    }

    /// Render a step into an invocation
    pub fn invocation(
        &self,
        stage: &str,
        step: &Step,
        context: &ExecutionContext,
        extra_env: &[(String, String)],
    ) -> Result<StepInvocation, PipelineError> {
        let command = match &step.action {
            StepAction::Run { command } => CommandLine::Shell(context.render(command)?),
            StepAction::Checkout { path } => checkout_command(stage, path.as_deref(), context)?,
        };

        let working_dir = match &step.working_dir {
            Some(dir) => context.workspace_path(dir)?,
            None => PathBuf::from(context.workspace()),
        };

        let mut env = context.step_environment();
        env.extend(extra_env.iter().cloned());

        Ok(StepInvocation {
            command,
            env,
            working_dir,
            timeout: step.timeout,
        })
    }
}

/// `git clone` of the trigger repository, run without a shell
fn checkout_command(
    stage: &str,
    path: Option<&str>,
    context: &ExecutionContext,
) -> Result<CommandLine, PipelineError> {
    let trigger = context.trigger();
    let repository = trigger.repository.as_ref().ok_or_else(|| PipelineError::StageExecution {
        stage: stage.to_string(),
        message: "checkout requires a repository in the trigger".to_string(),
    })?;

    let mut args = vec!["clone".to_string()];
    if let Some(branch) = &trigger.branch {
        args.push("--branch".to_string());
        args.push(branch.clone());
    }
    args.push("--".to_string());
    args.push(repository.clone());
    args.push(match path {
        Some(path) => {
            let rendered = context.render(path)?;
            workspace_relative(&rendered)?;
            rendered
        }
        None => ".".to_string(),
    });

    Ok(CommandLine::Exec {
        program: context.tools().program("git").to_string(),
        args,
    })
}
