//! Quality gates - external pass/fail checks a stage waits on

use crate::core::{ExecutionContext, GateSpec, PipelineError};
use crate::tools::{StepInvocation, StepRunner};
use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Answer from one poll of a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    /// The check passed
    Pass,
    /// No answer yet
    Pending,
    /// The check reported a terminal non-passing status
    Rejected(String),
}

/// Something that can be asked whether a stage may proceed
#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn poll(&self, context: &ExecutionContext) -> Result<GateStatus, PipelineError>;
}

/// Map a reported status string onto a gate answer
pub fn classify(spec: &GateSpec, reported: &str) -> GateStatus {
    let status = reported.trim();
    if status == spec.pass_status {
        GateStatus::Pass
    } else if spec.pending_statuses.iter().any(|p| p == status) {
        GateStatus::Pending
    } else {
        GateStatus::Rejected(status.to_string())
    }
}

/// Gate backed by a check command whose trimmed stdout is the status
pub struct CommandGate<'a, S> {
    runner: &'a S,
    spec: &'a GateSpec,
    env: Vec<(String, String)>,
}

impl<'a, S: StepRunner> CommandGate<'a, S> {
    pub fn new(runner: &'a S, spec: &'a GateSpec) -> Self {
        Self {
            runner,
            spec,
            env: Vec::new(),
        }
    }

    /// Extra environment for the check, e.g. the stage's credentials
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl<'a, S: StepRunner> QualityGate for CommandGate<'a, S> {
    async fn poll(&self, context: &ExecutionContext) -> Result<GateStatus, PipelineError> {
        let command = context.render(&self.spec.check)?;
        let mut env = context.step_environment();
        env.extend(self.env.iter().cloned());

        let invocation = StepInvocation::shell(command, context.workspace().to_path_buf(), self.spec.timeout)
            .with_env(env);

        match self.runner.run(&invocation).await {
            Ok(output) => Ok(classify(self.spec, &context.mask(&output.stdout))),
            Err(e) => {
                // A failing check is no answer; the wait bound still applies
                warn!("Gate check failed, polling again: {}", context.mask(&e.to_string()));
                Ok(GateStatus::Pending)
            }
        }
    }
}

/// Poll `gate` until it answers or the spec's timeout elapses
///
/// `on_pending` is called after every poll that returned no answer.
///
/// # Errors
/// - `GateRejected` with the status verbatim when the gate rejects
/// - `Timeout` when no answer arrives within `spec.timeout`
pub async fn wait_for_gate<G, F>(
    gate: &G,
    stage: &str,
    spec: &GateSpec,
    context: &ExecutionContext,
    mut on_pending: F,
) -> Result<(), PipelineError>
where
    G: QualityGate + ?Sized,
    F: FnMut(usize),
{
    let polling = async {
        let mut polls = 0usize;
        loop {
            polls += 1;
            match gate.poll(context).await? {
                GateStatus::Pass => {
                    info!("Gate for stage {} passed after {} poll(s)", stage, polls);
                    return Ok(());
                }
                GateStatus::Rejected(status) => {
                    warn!("Gate for stage {} rejected: {}", stage, status);
                    return Err(PipelineError::GateRejected {
                        stage: stage.to_string(),
                        status,
                    });
                }
                GateStatus::Pending => {
                    debug!("Gate for stage {} pending (poll {})", stage, polls);
                    on_pending(polls);
                    sleep(spec.poll_interval).await;
                }
            }
        }
    };

    timeout(spec.timeout, polling).await.map_err(|_| {
        warn!("Gate for stage {} timed out after {:?}", stage, spec.timeout);
        PipelineError::Timeout {
            stage: stage.to_string(),
            after: spec.timeout,
        }
    })?
}
