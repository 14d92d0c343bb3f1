//! Execution context - parameters, environment and credentials of one run
//!
//! A context is created for exactly one pipeline run and is never shared
//! with another run.

use crate::core::credentials::{CredentialLease, CredentialProvider, Secret};
use crate::core::error::PipelineError;
use crate::core::params::{check_allowed, substitute, Reference, BRANCH_PATTERN, REPOSITORY_PATTERN};
use crate::tools::ToolsConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const MASK: &str = "****";

/// What triggered the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// Repository URL
    pub repository: Option<String>,

    /// Branch to build
    pub branch: Option<String>,
}

impl TriggerInfo {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: Some(repository.into()),
            branch: Some(branch.into()),
        }
    }

    /// Reject values that could not be substituted into a command safely
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let Some(repository) = &self.repository {
            check_allowed("trigger.repository", repository, REPOSITORY_PATTERN)?;
        }
        if let Some(branch) = &self.branch {
            check_allowed("trigger.branch", branch, BRANCH_PATTERN)?;
        }
        Ok(())
    }
}

/// Check that `path` names a location inside the workspace
///
/// Absolute paths and `..` components are rejected.
pub fn workspace_relative(path: &str) -> Result<&Path, PipelineError> {
    let candidate = Path::new(path);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(PipelineError::Config(format!(
            "Path '{}' must stay inside the run workspace",
            path
        )));
    }
    Ok(candidate)
}

/// Per-run bindings handed to every stage
pub struct ExecutionContext {
    run_id: Uuid,
    workspace: PathBuf,
    params: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    tools: ToolsConfig,
    trigger: TriggerInfo,
    credentials: Arc<dyn CredentialProvider>,
    outstanding: Arc<AtomicUsize>,
    masks: Mutex<Vec<String>>,
}

impl ExecutionContext {
    /// Create a context for run `run_id` working in `workspace`
    pub fn new(run_id: Uuid, workspace: PathBuf, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            run_id,
            workspace,
            params: BTreeMap::new(),
            env: BTreeMap::new(),
            tools: ToolsConfig::default(),
            trigger: TriggerInfo::default(),
            credentials,
            outstanding: Arc::new(AtomicUsize::new(0)),
            masks: Mutex::new(Vec::new()),
        }
    }

    /// Bound (already validated) parameter values
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_tools(mut self, tools: ToolsConfig) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerInfo) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Render `template` and resolve it against the workspace
    pub fn workspace_path(&self, template: &str) -> Result<PathBuf, PipelineError> {
        let rendered = self.render(template)?;
        Ok(self.workspace.join(workspace_relative(&rendered)?))
    }

    pub fn trigger(&self) -> &TriggerInfo {
        &self.trigger
    }

    pub fn tools(&self) -> &ToolsConfig {
        &self.tools
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Value of a parameter
    pub fn resolve(&self, name: &str) -> Result<&str, PipelineError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::MissingParameter(name.to_string()))
    }

    /// Value bound to a placeholder reference
    pub fn lookup(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::Param(name) => self.params.get(name).cloned(),
            Reference::Env(name) => self.env.get(name).cloned(),
            Reference::Tool(name) => self.tools.get(name).map(str::to_string),
            Reference::RunId => Some(self.run_id.to_string()),
            Reference::Workspace => Some(self.workspace.display().to_string()),
            Reference::Repository => self.trigger.repository.clone(),
            Reference::Branch => self.trigger.branch.clone(),
        }
    }

    /// Substitute every placeholder in `template`
    pub fn render(&self, template: &str) -> Result<String, PipelineError> {
        substitute(template, |reference| self.lookup(reference))
    }

    /// Environment exported to every step
    ///
    /// Contains the pipeline's environment bindings, each parameter as
    /// `PARAM_<NAME>`, and the run id and workspace.
    pub fn step_environment(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (name, value) in &self.params {
            vars.push((format!("PARAM_{}", name.to_ascii_uppercase()), value.clone()));
        }

        vars.push(("PIPEWRIGHT_RUN_ID".to_string(), self.run_id.to_string()));
        vars.push(("PIPEWRIGHT_WORKSPACE".to_string(), self.workspace.display().to_string()));
        vars
    }

    /// Acquire a credential for the caller's scope
    ///
    /// The returned lease releases the credential when dropped. The secret
    /// is masked in any text passed through [`ExecutionContext::mask`].
    pub async fn lease(&self, id: &str) -> Result<CredentialLease, PipelineError> {
        let secret = self
            .credentials
            .acquire(id)
            .await
            .map_err(|e| PipelineError::Credential {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        self.register_mask(secret.expose());

        Ok(CredentialLease::new(
            id.to_string(),
            secret,
            self.credentials.clone(),
            self.outstanding.clone(),
        ))
    }

    /// Run `f` with credential `id`, releasing it on every exit path
    pub async fn with_scoped_credential<F, Fut, T>(&self, id: &str, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(Secret) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let lease = self.lease(id).await?;
        let result = f(lease.secret().clone()).await;
        lease.release();
        result
    }

    /// Number of credentials acquired and not yet released
    pub fn outstanding_credentials(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn register_mask(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut masks = self.masks.lock().unwrap_or_else(|e| e.into_inner());
        if !masks.iter().any(|m| m == value) {
            masks.push(value.to_string());
        }
    }

    /// Replace every known secret in `text`
    pub fn mask(&self, text: &str) -> String {
        let masks = self.masks.lock().unwrap_or_else(|e| e.into_inner());
        masks
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), MASK))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("workspace", &self.workspace)
            .field("params", &self.params)
            .field("env", &self.env)
            .field("trigger", &self.trigger)
            .field("outstanding_credentials", &self.outstanding_credentials())
            .finish()
    }
}
