//! Stage domain model

use std::time::Duration;

/// A named, ordered unit of pipeline work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// Steps, run in order
    pub steps: Vec<Step>,

    /// Gate checked once the steps succeed
    pub gate: Option<GateSpec>,

    /// Credentials leased while the stage runs
    pub credentials: Vec<CredentialBinding>,
}

/// One opaque invocation inside a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Display name
    pub name: String,

    /// What to invoke
    pub action: StepAction,

    /// Working directory relative to the run workspace
    pub working_dir: Option<String>,

    /// Upper bound on the invocation
    pub timeout: Duration,
}

/// The kind of external call a step makes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Shell command template
    Run { command: String },
    /// Clone the trigger repository into `path` (workspace root when unset)
    Checkout { path: Option<String> },
}

impl StepAction {
    /// Template text that may contain placeholders
    pub fn template(&self) -> Option<&str> {
        match self {
            StepAction::Run { command } => Some(command),
            StepAction::Checkout { path } => path.as_deref(),
        }
    }
}

/// External pass/fail check attached to a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSpec {
    /// Command whose trimmed stdout is the status
    pub check: String,

    /// Status that lets the run continue
    pub pass_status: String,

    /// Statuses meaning "poll again"
    pub pending_statuses: Vec<String>,

    /// Upper bound on the whole wait
    pub timeout: Duration,

    /// Delay between polls
    pub poll_interval: Duration,
}

/// Credential exposed to a stage's steps as environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBinding {
    pub id: String,
    pub secret_var: String,
    pub username_var: Option<String>,
}

/// Defaults used when a step or gate sets no value of its own
#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub step_timeout: Duration,
    pub gate_timeout: Duration,
    pub gate_poll_interval: Duration,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(3600),
            gate_timeout: Duration::from_secs(300),
            gate_poll_interval: Duration::from_secs(5),
        }
    }
}

impl Stage {
    /// Whether the stage waits on an external gate
    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }
}
