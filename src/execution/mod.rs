//! Pipeline execution: runner, gates, post hooks and cancellation

pub mod cancel;
pub mod dispatcher;
pub mod executor;
pub mod gate;
pub mod runner;

pub use cancel::AbortSignal;
pub use dispatcher::{ArchiveHook, CommandHook, DispatchSummary, OutcomeDispatcher, PostHook};
pub use executor::StepExecutor;
pub use gate::{wait_for_gate, CommandGate, GateStatus, QualityGate};
pub use runner::{EventHandler, ExecutionEvent, RunReport, Runner, RunnerConfig};
