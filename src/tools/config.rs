//! Tool locations for one run

use std::collections::BTreeMap;

/// Explicit table of external tool locations
///
/// Loaded from the pipeline file and handed to each run's context; there is
/// no process-wide registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolsConfig {
    tools: BTreeMap<String, String>,
}

impl ToolsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(tools: BTreeMap<String, String>) -> Self {
        Self { tools }
    }

    pub fn with_tool(mut self, name: impl Into<String>, location: impl Into<String>) -> Self {
        self.tools.insert(name.into(), location.into());
        self
    }

    /// Location of a tool, if configured
    pub fn get(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(String::as_str)
    }

    /// Location of a tool, falling back to its bare name (PATH lookup)
    pub fn program<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).unwrap_or(name)
    }
}
