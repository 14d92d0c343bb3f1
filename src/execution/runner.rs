//! Runner - drives a pipeline run stage by stage

use crate::{
    core::{CredentialLease, ExecutionContext, ExecutionStatus, Outcome, PipelineError, PipelineRun, Stage, StageState},
    execution::{
        cancel::AbortSignal,
        dispatcher::{DispatchSummary, OutcomeDispatcher},
        executor::StepExecutor,
        gate::{wait_for_gate, CommandGate},
    },
    tools::StepRunner,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
    },
    StageStarted {
        stage: String,
    },
    StepStarted {
        stage: String,
        step: String,
    },
    StepOutput {
        stage: String,
        step: String,
        output: String,
    },
    GateWaiting {
        stage: String,
        polls: usize,
    },
    GatePassed {
        stage: String,
    },
    StageSucceeded {
        stage: String,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    StageAborted {
        stage: String,
        reason: String,
    },
    StageSkipped {
        stage: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: ExecutionStatus,
    },
    HooksDispatched {
        invoked: usize,
        failed: usize,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Locations used by runs
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Each run works in `<workspace_root>/<run id>`
    pub workspace_root: PathBuf,

    /// Archive hooks copy into `<archive_root>/<run id>`
    pub archive_root: PathBuf,

    /// Leave run workspaces on disk after the hooks ran
    pub keep_workspaces: bool,
}

impl RunnerConfig {
    pub fn new(workspace_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            archive_root: archive_root.into(),
            keep_workspaces: false,
        }
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_archive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.archive_root = root.into();
        self
    }

    pub fn with_keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }
}

impl Default for RunnerConfig {
    /// Under the platform data directory, falling back to the temp dir
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("pipewright");
        Self::new(base.join("workspaces"), base.join("archive"))
    }
}

/// Final report of a run
#[derive(Debug)]
pub struct RunReport {
    pub run: PipelineRun,
    pub hooks: DispatchSummary,
}

impl RunReport {
    pub fn status(&self) -> ExecutionStatus {
        self.run.status()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.run.outcome()
    }

    pub fn first_error(&self) -> Option<&PipelineError> {
        self.run.first_error()
    }
}

/// Sequential pipeline runner
///
/// Stages run strictly in order. The first stage that fails or aborts
/// halts the run; later stages are marked skipped. The dispatcher runs
/// for every outcome, after which the run's workspace is removed.
///
/// A runner may drive several runs at once; each run has its own
/// context, workspace and abort signal.
pub struct Runner<S> {
    executor: StepExecutor<S>,
    dispatcher: OutcomeDispatcher,
    keep_workspaces: bool,
    event_handlers: Vec<EventHandler>,
}

impl<S: StepRunner> Runner<S> {
    pub fn new(runner: S, dispatcher: OutcomeDispatcher) -> Self {
        Self {
            executor: StepExecutor::new(runner),
            dispatcher,
            keep_workspaces: false,
            event_handlers: Vec::new(),
        }
    }

    /// Leave workspaces on disk once runs finish
    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the run to completion and dispatch its post hooks
    pub async fn execute(&self, run: PipelineRun) -> RunReport {
        self.execute_with_abort(run, &AbortSignal::new()).await
    }

    /// Execute the run, interrupting it when `abort` fires
    ///
    /// The signal only affects this run.
    pub async fn execute_with_abort(&self, mut run: PipelineRun, abort: &AbortSignal) -> RunReport {
        let run_id = run.id();
        info!("Starting pipeline run: {} ({})", run.pipeline_name(), run_id);
        self.emit_event(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: run.pipeline_name().to_string(),
        });

        run.start();
        let stages: Vec<Stage> = run.graph().iter().cloned().collect();

        let mut halted = self.prepare_workspace(run.context()).await.err();

        for (index, stage) in stages.iter().enumerate() {
            if halted.is_none() {
                if let Some(reason) = abort.reason() {
                    halted = Some(PipelineError::Cancelled(reason));
                }
            }
            if halted.is_some() {
                run.set_stage_state(index, StageState::Skipped);
                self.emit_event(ExecutionEvent::StageSkipped {
                    stage: stage.name.clone(),
                });
                continue;
            }

            let started_at = Utc::now();
            run.set_stage_state(index, StageState::Running { started_at });
            self.emit_event(ExecutionEvent::StageStarted {
                stage: stage.name.clone(),
            });

            let result = tokio::select! {
                biased;
                reason = abort.aborted() => {
                    warn!("Stage {} interrupted: {}", stage.name, reason);
                    Err(PipelineError::Cancelled(reason))
                }
                result = self.run_stage(stage, run.context()) => result,
            };
            let finished_at = Utc::now();

            let state = match result {
                Ok(()) => {
                    info!("Stage {} succeeded", stage.name);
                    self.emit_event(ExecutionEvent::StageSucceeded {
                        stage: stage.name.clone(),
                    });
                    StageState::Succeeded { started_at, finished_at }
                }
                Err(e) => {
                    let state = match Outcome::from_error(&e) {
                        Outcome::Aborted { reason } => {
                            self.emit_event(ExecutionEvent::StageAborted {
                                stage: stage.name.clone(),
                                reason: reason.to_string(),
                            });
                            StageState::Aborted { reason, started_at, finished_at }
                        }
                        _ => {
                            self.emit_event(ExecutionEvent::StageFailed {
                                stage: stage.name.clone(),
                                error: e.to_string(),
                            });
                            StageState::Failed {
                                error: e.to_string(),
                                started_at,
                                finished_at,
                            }
                        }
                    };
                    error!("Stage {} halted the run: {}", stage.name, e);
                    halted = Some(e);
                    state
                }
            };
            run.set_stage_state(index, state);
        }

        let outcome = halted.as_ref().map(Outcome::from_error).unwrap_or(Outcome::Succeeded);
        run.conclude(outcome, halted);

        info!("Pipeline run finished: {} - {:?}", run.pipeline_name(), run.status());
        self.emit_event(ExecutionEvent::PipelineCompleted {
            run_id,
            status: run.status(),
        });

        let hooks = self.dispatcher.dispatch(&run).await;
        self.emit_event(ExecutionEvent::HooksDispatched {
            invoked: hooks.invoked.len(),
            failed: hooks.failures.len(),
        });

        if !self.keep_workspaces {
            self.remove_workspace(run.context()).await;
        }

        RunReport { run, hooks }
    }

    async fn prepare_workspace(&self, context: &ExecutionContext) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(context.workspace())
            .await
            .map_err(|e| {
                PipelineError::Config(format!(
                    "Cannot create workspace {}: {}",
                    context.workspace().display(),
                    e
                ))
            })
    }

    async fn remove_workspace(&self, context: &ExecutionContext) {
        match tokio::fs::remove_dir_all(context.workspace()).await {
            Ok(()) => debug!("Removed workspace {}", context.workspace().display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", context.workspace().display(), e),
        }
    }

    /// Run one stage: lease its credentials, run its steps, wait on its gate
    ///
    /// Leases live for the whole stage and are released when this future
    /// completes or is dropped.
    async fn run_stage(&self, stage: &Stage, context: &ExecutionContext) -> Result<(), PipelineError> {
        let mut leases: Vec<CredentialLease> = Vec::with_capacity(stage.credentials.len());
        let mut env = Vec::new();

        for binding in &stage.credentials {
            let lease = context.lease(&binding.id).await?;
            env.push((binding.secret_var.clone(), lease.secret().expose().to_string()));
            if let (Some(var), Some(user)) = (&binding.username_var, lease.secret().username()) {
                env.push((var.clone(), user.to_string()));
            }
            leases.push(lease);
        }

        for step in &stage.steps {
            self.emit_event(ExecutionEvent::StepStarted {
                stage: stage.name.clone(),
                step: step.name.clone(),
            });

            let output = self.executor.execute(&stage.name, step, context, &env).await?;
            if !output.stdout.is_empty() {
                self.emit_event(ExecutionEvent::StepOutput {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                    output: output.stdout,
                });
            }
        }

        if let Some(spec) = &stage.gate {
            let gate = CommandGate::new(self.executor.runner(), spec).with_env(env.clone());
            self.emit_event(ExecutionEvent::GateWaiting {
                stage: stage.name.clone(),
                polls: 0,
            });

            wait_for_gate(&gate, &stage.name, spec, context, |polls| {
                self.emit_event(ExecutionEvent::GateWaiting {
                    stage: stage.name.clone(),
                    polls,
                })
            })
            .await?;

            self.emit_event(ExecutionEvent::GatePassed {
                stage: stage.name.clone(),
            });
        }

        drop(leases);
        Ok(())
    }
}
