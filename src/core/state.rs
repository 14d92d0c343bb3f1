//! Execution state models

use crate::core::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is executing stages
    Running,
    /// Every stage succeeded
    Succeeded,
    /// A stage failed
    Failed,
    /// A gate, timeout or abort signal stopped the run
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Aborted
        )
    }

    /// Stable name used for storage and hook environment
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Aborted => "Aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Succeeded" => Some(ExecutionStatus::Succeeded),
            "Failed" => Some(ExecutionStatus::Failed),
            "Aborted" => Some(ExecutionStatus::Aborted),
            _ => None,
        }
    }
}

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Status reported by the gate, verbatim
    GateRejected(String),
    /// The gate never answered within its bound
    Timeout { after: Duration },
    /// An abort signal interrupted the run
    Cancelled(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::GateRejected(status) => write!(f, "{}", status),
            AbortReason::Timeout { after } => write!(f, "timeout after {}s", after.as_secs_f64()),
            AbortReason::Cancelled(reason) => write!(f, "cancelled: {}", reason),
        }
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed { error: String },
    Aborted { reason: AbortReason },
}

impl Outcome {
    /// Classify the error that halted a run
    pub fn from_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::GateRejected { status, .. } => Outcome::Aborted {
                reason: AbortReason::GateRejected(status.clone()),
            },
            PipelineError::Timeout { after, .. } => Outcome::Aborted {
                reason: AbortReason::Timeout { after: *after },
            },
            PipelineError::Cancelled(reason) => Outcome::Aborted {
                reason: AbortReason::Cancelled(reason.clone()),
            },
            other => Outcome::Failed {
                error: other.to_string(),
            },
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            Outcome::Succeeded => ExecutionStatus::Succeeded,
            Outcome::Failed { .. } => ExecutionStatus::Failed,
            Outcome::Aborted { .. } => ExecutionStatus::Aborted,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// State of a single stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageState {
    /// Stage has not been reached
    Pending,
    /// Stage is currently running
    Running { started_at: DateTime<Utc> },
    /// Stage completed and its gate (if any) passed
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// A step reported failure
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// The gate or an abort signal stopped the stage
    Aborted {
        reason: AbortReason,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// Never run because an earlier stage halted the run
    Skipped,
}

impl StageState {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. }
                | StageState::Failed { .. }
                | StageState::Aborted { .. }
                | StageState::Skipped
        )
    }

    /// Whether the stage's steps were started
    pub fn was_executed(&self) -> bool {
        !matches!(self, StageState::Pending | StageState::Skipped)
    }
}

/// A stage's name and its current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub state: StageState,
}
