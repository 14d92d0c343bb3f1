//! Pipeline configuration from YAML

use crate::core::error::PipelineError;
use crate::core::graph::{DeclaredNames, StageGraph};
use crate::core::params::ParameterSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Trigger parameters with their allow-lists
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,

    /// Environment bindings exported to every step
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Locations of external tools, referenced as `{{ tools.name }}`
    #[serde(default)]
    pub tools: BTreeMap<String, String>,

    /// Defaults applied to steps and gates that don't set their own
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Ordered stages
    pub stages: Vec<StageConfig>,

    /// Hooks dispatched after the run concludes
    #[serde(default)]
    pub post: PostConfig,
}

/// Pipeline-wide defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Timeout for a single step (in seconds)
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Upper bound on waiting for a gate (in seconds)
    #[serde(default)]
    pub gate_timeout_secs: Option<u64>,

    /// Delay between gate polls (in seconds)
    #[serde(default)]
    pub gate_poll_interval_secs: Option<u64>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Steps run in order
    pub steps: Vec<StepConfig>,

    /// Quality gate checked after the steps succeed
    #[serde(default)]
    pub gate: Option<GateConfig>,

    /// Credentials held for the duration of the stage
    #[serde(default)]
    pub credentials: Vec<CredentialBindingConfig>,
}

/// A single step: exactly one of `run` or `checkout`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command template
    #[serde(default)]
    pub run: Option<String>,

    /// Clone the trigger repository
    #[serde(default)]
    pub checkout: Option<CheckoutConfig>,

    /// Working directory, relative to the run workspace
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Timeout for this step (overrides default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Checkout action options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    /// Directory inside the workspace to clone into
    #[serde(default)]
    pub path: Option<String>,
}

/// Gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Command whose trimmed stdout is the gate status
    pub check: String,

    /// Status that lets the run proceed
    #[serde(default = "default_pass_status")]
    pub pass_status: String,

    /// Statuses meaning "not decided yet, poll again"
    #[serde(default = "default_pending_statuses")]
    pub pending_statuses: Vec<String>,

    /// Upper bound on waiting (overrides default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Delay between polls (overrides default)
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

fn default_pass_status() -> String {
    "OK".to_string()
}

fn default_pending_statuses() -> Vec<String> {
    vec![
        "PENDING".to_string(),
        "IN_PROGRESS".to_string(),
        String::new(),
    ]
}

/// Binds a credential to step environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBindingConfig {
    /// Credential identifier understood by the provider
    pub id: String,

    /// Variable receiving the secret
    pub secret_var: String,

    /// Variable receiving the username, if the credential has one
    #[serde(default)]
    pub username_var: Option<String>,
}

/// Post-run hook sets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostConfig {
    /// Run for every outcome
    #[serde(default)]
    pub always: Vec<HookConfig>,

    /// Run only when the pipeline succeeded
    #[serde(default)]
    pub success: Vec<HookConfig>,

    /// Run when the pipeline failed or was aborted
    #[serde(default)]
    pub failure: Vec<HookConfig>,
}

/// A single hook: exactly one of `run` or `archive`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command template
    #[serde(default)]
    pub run: Option<String>,

    /// Workspace-relative files to archive
    #[serde(default)]
    pub archive: Option<Vec<String>>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("Pipeline name is empty".to_string()));
        }

        for (name, spec) in &self.parameters {
            spec.check(name)?;
        }

        // Parameters are exported as PARAM_<NAME>; names differing only in case would clash
        let mut exported = HashSet::new();
        for name in self.parameters.keys() {
            let var = format!("PARAM_{}", name.to_ascii_uppercase());
            if !exported.insert(var.clone()) {
                return Err(PipelineError::Config(format!(
                    "Parameter '{}' collides with another parameter as {}",
                    name, var
                )));
            }
        }

        for hook in self.post.always.iter().chain(&self.post.success).chain(&self.post.failure) {
            match (&hook.run, &hook.archive) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(PipelineError::Config(format!(
                        "Hook '{}' must set exactly one of 'run' or 'archive'",
                        hook.name.as_deref().unwrap_or("<unnamed>")
                    )))
                }
            }
        }

        let mut bound_vars = HashSet::new();
        for stage in &self.stages {
            bound_vars.clear();
            for binding in &stage.credentials {
                let vars = std::iter::once(&binding.secret_var).chain(binding.username_var.as_ref());
                for var in vars {
                    if !bound_vars.insert(var.as_str()) {
                        return Err(PipelineError::Config(format!(
                            "Stage '{}' binds variable '{}' more than once",
                            stage.name, var
                        )));
                    }
                }
            }
        }

        // Building the graph checks names, steps and every placeholder
        self.to_graph().map(|_| ())
    }

    /// Names a template may reference
    pub fn declared_names(&self) -> DeclaredNames {
        DeclaredNames {
            params: self.parameters.keys().cloned().collect(),
            env: self.environment.keys().cloned().collect(),
            tools: self.tools.keys().cloned().collect(),
        }
    }

    /// Convert config to the immutable stage graph
    pub fn to_graph(&self) -> Result<StageGraph, PipelineError> {
        StageGraph::build(&self.stages, &self.defaults, &self.declared_names())
    }
}
