//! Outcome dispatcher - post-run hooks chosen by the run's outcome

use crate::{
    core::{
        config::{HookConfig, PostConfig},
        workspace_relative, Outcome, PipelineRun,
    },
    tools::{StepInvocation, StepRunner},
};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A post-run side effect
#[async_trait]
pub trait PostHook: Send + Sync {
    /// Name used in logs and the dispatch summary
    fn name(&self) -> &str;

    async fn run(&self, run: &PipelineRun) -> Result<()>;
}

/// Runs a shell command template after the run
///
/// The command sees the step environment plus `PIPEWRIGHT_STATUS` and
/// `PIPEWRIGHT_ERROR`.
pub struct CommandHook {
    name: String,
    command: String,
    runner: Arc<dyn StepRunner>,
    timeout: Duration,
}

impl CommandHook {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        runner: Arc<dyn StepRunner>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            runner,
            timeout,
        }
    }
}

#[async_trait]
impl PostHook for CommandHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, run: &PipelineRun) -> Result<()> {
        let context = run.context();
        let command = context.render(&self.command)?;

        let workspace = context.workspace();
        let working_dir = if workspace.is_dir() {
            workspace.to_path_buf()
        } else {
            std::env::temp_dir()
        };

        let mut env = context.step_environment();
        env.push(("PIPEWRIGHT_STATUS".to_string(), run.status().as_str().to_string()));
        env.push(("PIPEWRIGHT_ERROR".to_string(), failure_text(run)));

        let invocation = StepInvocation::shell(command, working_dir, self.timeout).with_env(env);
        let output = self
            .runner
            .run(&invocation)
            .await
            .map_err(|e| anyhow::anyhow!(context.mask(&e.to_string())))
            .with_context(|| format!("Hook '{}' failed", self.name))?;

        debug!("Hook {} output: {}", self.name, context.mask(output.stdout.trim()));
        Ok(())
    }
}

/// Text describing why the run did not succeed; empty on success
fn failure_text(run: &PipelineRun) -> String {
    match (run.first_error(), run.outcome()) {
        (Some(error), _) => run.context().mask(&error.to_string()),
        (None, Some(Outcome::Aborted { reason })) => reason.to_string(),
        (None, Some(Outcome::Failed { error })) => error.clone(),
        _ => String::new(),
    }
}

/// Outcome record written next to archived files
#[derive(Debug, Serialize)]
struct ArchiveManifest<'a> {
    run_id: String,
    pipeline: &'a str,
    status: &'a str,
    outcome: Option<&'a Outcome>,
    error: String,
    files: &'a [String],
}

/// Copies workspace files into `<archive_root>/<run id>/`
pub struct ArchiveHook {
    name: String,
    files: Vec<String>,
    archive_root: PathBuf,
}

impl ArchiveHook {
    pub fn new(name: impl Into<String>, files: Vec<String>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            files,
            archive_root: archive_root.into(),
        }
    }

    /// Destination directory for a run
    pub fn destination(&self, run: &PipelineRun) -> PathBuf {
        self.archive_root.join(run.id().to_string())
    }
}

#[async_trait]
impl PostHook for ArchiveHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, run: &PipelineRun) -> Result<()> {
        let context = run.context();
        let destination = self.destination(run);
        tokio::fs::create_dir_all(&destination)
            .await
            .with_context(|| format!("Failed to create archive directory {}", destination.display()))?;

        let mut archived = Vec::new();
        let mut missing = Vec::new();

        for file in &self.files {
            let rendered = context.render(file)?;
            let relative = workspace_relative(&rendered)?;
            let source = context.workspace().join(relative);
            let target = destination.join(relative);

            if !source.is_file() {
                missing.push(rendered);
                continue;
            }

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target)
                .await
                .with_context(|| format!("Failed to archive {}", source.display()))?;
            archived.push(rendered);
        }

        let manifest = ArchiveManifest {
            run_id: run.id().to_string(),
            pipeline: run.pipeline_name(),
            status: run.status().as_str(),
            outcome: run.outcome(),
            error: failure_text(run),
            files: &archived,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        tokio::fs::write(destination.join("outcome.json"), json)
            .await
            .context("Failed to write archive manifest")?;

        info!("Archived {} file(s) to {}", archived.len(), destination.display());

        if !missing.is_empty() {
            bail!("Files not found in workspace: {}", missing.join(", "));
        }
        Ok(())
    }
}

/// What happened during a dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Hooks invoked, in order
    pub invoked: Vec<String>,

    /// Hooks that returned an error, with the error text
    pub failures: Vec<(String, String)>,
}

impl DispatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Chooses and runs post-run hooks from a run's outcome
///
/// `always` hooks run first for every outcome, then `success` hooks for a
/// succeeded run or `failure` hooks for a failed or aborted one. Hook
/// errors are logged and collected, never propagated.
#[derive(Default)]
pub struct OutcomeDispatcher {
    always: Vec<Box<dyn PostHook>>,
    success: Vec<Box<dyn PostHook>>,
    failure: Vec<Box<dyn PostHook>>,
}

impl OutcomeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the hook sets declared in a pipeline's `post` section
    pub fn from_config(
        post: &PostConfig,
        archive_root: &Path,
        runner: Arc<dyn StepRunner>,
        hook_timeout: Duration,
    ) -> Self {
        let build = |hooks: &[HookConfig]| -> Vec<Box<dyn PostHook>> {
            hooks
                .iter()
                .filter_map(|hook| hook_from_config(hook, archive_root, runner.clone(), hook_timeout))
                .collect()
        };

        Self {
            always: build(post.always.as_slice()),
            success: build(post.success.as_slice()),
            failure: build(post.failure.as_slice()),
        }
    }

    pub fn always(mut self, hook: impl PostHook + 'static) -> Self {
        self.always.push(Box::new(hook));
        self
    }

    pub fn on_success(mut self, hook: impl PostHook + 'static) -> Self {
        self.success.push(Box::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl PostHook + 'static) -> Self {
        self.failure.push(Box::new(hook));
        self
    }

    /// Total number of registered hooks
    pub fn len(&self) -> usize {
        self.always.len() + self.success.len() + self.failure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the hooks matching the run's outcome
    pub async fn dispatch(&self, run: &PipelineRun) -> DispatchSummary {
        let succeeded = run.outcome().is_some_and(Outcome::is_success);
        let selected = if succeeded { &self.success } else { &self.failure };

        info!(
            "Dispatching post hooks for run {} ({})",
            run.id(),
            run.status().as_str()
        );

        let mut summary = DispatchSummary::default();
        for hook in self.always.iter().chain(selected.iter()) {
            summary.invoked.push(hook.name().to_string());
            if let Err(e) = hook.run(run).await {
                let message = format!("{:#}", e);
                warn!("Post hook {} failed: {}", hook.name(), message);
                summary.failures.push((hook.name().to_string(), message));
            }
        }
        summary
    }
}

fn hook_from_config(
    hook: &HookConfig,
    archive_root: &Path,
    runner: Arc<dyn StepRunner>,
    timeout: Duration,
) -> Option<Box<dyn PostHook>> {
    match (&hook.run, &hook.archive) {
        (Some(command), None) => {
            let name = hook.name.clone().unwrap_or_else(|| "run".to_string());
            Some(Box::new(CommandHook::new(name, command.clone(), runner, timeout)))
        }
        (None, Some(files)) => {
            let name = hook.name.clone().unwrap_or_else(|| "archive".to_string());
            Some(Box::new(ArchiveHook::new(name, files.clone(), archive_root)))
        }
        _ => {
            warn!("Ignoring hook {:?}: needs exactly one of run or archive", hook.name);
            None
        }
    }
}
