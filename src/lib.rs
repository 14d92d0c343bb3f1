//! pipewright - a sequential pipeline runner with quality gates,
//! scoped credentials and outcome-dependent post-run hooks

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod tools;

// Re-export commonly used types
pub use crate::core::config::PipelineConfig;
pub use crate::core::{
    AbortReason, CredentialProvider, ExecutionContext, ExecutionStatus, Outcome, PipelineError,
    PipelineRun, RunRequest, StageGraph, TriggerInfo,
};
pub use crate::execution::{AbortSignal, ExecutionEvent, OutcomeDispatcher, PostHook, RunReport, Runner, RunnerConfig};
pub use crate::tools::{ShellRunner, StepRunner, ToolsConfig};
