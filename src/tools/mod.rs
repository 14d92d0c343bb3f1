//! External tool invocation
//!
//! Every step is an opaque call into some external tool. The engine only
//! looks at whether the call succeeded; [`StepRunner`] is the seam where
//! the call happens.

pub mod config;
pub mod response;
pub mod shell;

use async_trait::async_trait;
pub use config::ToolsConfig;
pub use response::{ToolError, ToolOutput};
pub use shell::ShellRunner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A command string interpreted by the shell
    Shell(String),
    /// A program with literal arguments, no shell involved
    Exec { program: String, args: Vec<String> },
}

impl std::fmt::Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandLine::Shell(command) => write!(f, "{}", command),
            CommandLine::Exec { program, args } => write!(f, "{} {}", program, args.join(" ")),
        }
    }
}

/// A fully rendered call, ready to run
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub command: CommandLine,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl StepInvocation {
    pub fn shell(command: impl Into<String>, working_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            command: CommandLine::Shell(command.into()),
            env: Vec::new(),
            working_dir,
            timeout,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run the invocation; `Ok` only if the tool reported success
    async fn run(&self, invocation: &StepInvocation) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl<T: StepRunner + ?Sized> StepRunner for Arc<T> {
    async fn run(&self, invocation: &StepInvocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation).await
    }
}
