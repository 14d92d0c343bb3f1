//! Tool output types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for tool invocations
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}
