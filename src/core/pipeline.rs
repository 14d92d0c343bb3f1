//! Pipeline run domain model

use crate::core::{
    config::PipelineConfig,
    context::{ExecutionContext, TriggerInfo},
    credentials::CredentialProvider,
    error::PipelineError,
    graph::StageGraph,
    params::bind_parameters,
    state::{ExecutionStatus, Outcome, StageRecord, StageState},
};
use crate::tools::ToolsConfig;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Trigger input for one run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Parameter overrides (validated against the pipeline's declarations)
    pub params: HashMap<String, String>,

    /// Repository reference
    pub trigger: TriggerInfo,
}

/// One execution of a pipeline
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    pipeline_name: String,
    graph: StageGraph,
    context: ExecutionContext,
    stages: Vec<StageRecord>,
    status: ExecutionStatus,
    outcome: Option<Outcome>,
    first_error: Option<PipelineError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a run over a graph snapshot and its own context
    pub fn new(pipeline_name: impl Into<String>, graph: StageGraph, context: ExecutionContext) -> Self {
        let stages = graph
            .iter()
            .map(|s| StageRecord {
                name: s.name.clone(),
                state: StageState::Pending,
            })
            .collect();

        Self {
            id: context.run_id(),
            pipeline_name: pipeline_name.into(),
            graph,
            context,
            stages,
            status: ExecutionStatus::Pending,
            outcome: None,
            first_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Prepare a run from configuration and trigger input
    ///
    /// Binds and validates parameters and trigger input before anything
    /// runs. The run's workspace is `<workspace_root>/<run id>`.
    pub fn from_config(
        config: &PipelineConfig,
        request: RunRequest,
        workspace_root: &Path,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, PipelineError> {
        let graph = config.to_graph()?;
        let params = bind_parameters(&config.parameters, &request.params)?;
        request.trigger.validate()?;

        let run_id = Uuid::new_v4();
        let workspace = workspace_root.join(run_id.to_string());

        let context = ExecutionContext::new(run_id, workspace, credentials)
            .with_params(params)
            .with_env(config.environment.clone())
            .with_tools(ToolsConfig::from_map(config.tools.clone()))
            .with_trigger(request.trigger);

        Ok(Self::new(config.name.clone(), graph, context))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    /// State of a stage by name
    pub fn stage_state(&self, name: &str) -> Option<&StageState> {
        self.stages.iter().find(|r| r.name == name).map(|r| &r.state)
    }

    /// Names of stages whose steps were started, in order
    pub fn executed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.state.was_executed())
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// The error that halted the run, if any
    pub fn first_error(&self) -> Option<&PipelineError> {
        self.first_error.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Fraction of stages in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self.stages.iter().filter(|r| r.state.is_terminal()).count();
        done as f64 / self.stages.len() as f64
    }

    /// Number of stages that succeeded
    pub fn succeeded_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|r| matches!(r.state, StageState::Succeeded { .. }))
            .count()
    }

    pub(crate) fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn set_stage_state(&mut self, index: usize, state: StageState) {
        if let Some(record) = self.stages.get_mut(index) {
            record.state = state;
        }
    }

    /// Set the terminal outcome; a second call is ignored
    ///
    /// Returns whether the outcome was recorded.
    pub(crate) fn conclude(&mut self, outcome: Outcome, error: Option<PipelineError>) -> bool {
        if let Some(existing) = &self.outcome {
            warn!(
                "Run {} already concluded as {:?}, ignoring {:?}",
                self.id, existing, outcome
            );
            return false;
        }

        self.status = outcome.status();
        self.outcome = Some(outcome);
        self.first_error = error;
        self.finished_at = Some(Utc::now());
        true
    }
}
