//! Pipeline error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Errors that can halt a pipeline run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed pipeline definition or stage graph
    #[error("Configuration error: {0}")]
    Config(String),

    /// A template referenced a name with no bound value
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// A parameter value was rejected by its allow-list
    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// An external call reported failure
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    /// The external quality check reported a non-OK status
    #[error("Gate rejected stage '{stage}' with status {status}")]
    GateRejected { stage: String, status: String },

    /// A scoped credential could not be acquired
    #[error("Credential '{id}' unavailable: {message}")]
    Credential { id: String, message: String },

    /// Waiting on a gate exceeded its bound
    #[error("Gate for stage '{stage}' timed out after {}s", .after.as_secs_f64())]
    Timeout { stage: String, after: Duration },

    /// The run was interrupted by an abort signal
    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    /// Whether this error concludes the run as Aborted rather than Failed
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            PipelineError::GateRejected { .. }
                | PipelineError::Timeout { .. }
                | PipelineError::Cancelled(_)
        )
    }
}
