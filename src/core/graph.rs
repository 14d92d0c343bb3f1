//! Stage graph - the ordered, validated sequence of stages

use crate::core::config::{DefaultsConfig, StageConfig, StepConfig};
use crate::core::context::workspace_relative;
use crate::core::error::PipelineError;
use crate::core::params::{references, Reference};
use crate::core::stage::{CredentialBinding, GateSpec, Stage, StageDefaults, Step, StepAction};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

/// Names a template is allowed to reference
#[derive(Debug, Clone, Default)]
pub struct DeclaredNames {
    pub params: BTreeSet<String>,
    pub env: BTreeSet<String>,
    pub tools: BTreeSet<String>,
}

impl DeclaredNames {
    fn check(&self, stage: &str, template: &str) -> Result<(), PipelineError> {
        for reference in references(template)? {
            let known = match &reference {
                Reference::Param(name) => self.params.contains(name),
                Reference::Env(name) => self.env.contains(name),
                Reference::Tool(name) => self.tools.contains(name),
                Reference::RunId | Reference::Workspace | Reference::Repository | Reference::Branch => true,
            };
            if !known {
                return Err(PipelineError::Config(format!(
                    "Stage '{}' references undefined substitution '{{{{ {} }}}}'",
                    stage, reference
                )));
            }
        }
        Ok(())
    }
}

/// Immutable ordered stages of one pipeline
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    stages: Vec<Stage>,
}

impl StageGraph {
    /// Build and validate the graph from stage definitions
    pub fn build(
        defs: &[StageConfig],
        defaults: &DefaultsConfig,
        declared: &DeclaredNames,
    ) -> Result<Self, PipelineError> {
        let fallback = StageDefaults::default();
        let defaults = StageDefaults {
            step_timeout: defaults
                .step_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.step_timeout),
            gate_timeout: defaults
                .gate_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.gate_timeout),
            gate_poll_interval: defaults
                .gate_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.gate_poll_interval),
        };

        let mut seen = HashSet::new();
        let mut stages = Vec::with_capacity(defs.len());

        for def in defs {
            if def.name.trim().is_empty() {
                return Err(PipelineError::Config("Stage name is empty".to_string()));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(PipelineError::Config(format!("Duplicate stage name: {}", def.name)));
            }
            if def.steps.is_empty() {
                return Err(PipelineError::Config(format!("Stage '{}' has no steps", def.name)));
            }

            let steps = def
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| Self::build_step(&def.name, i, step, &defaults, declared))
                .collect::<Result<Vec<_>, _>>()?;

            let gate = match &def.gate {
                Some(gate) => {
                    declared.check(&def.name, &gate.check)?;
                    Some(GateSpec {
                        check: gate.check.clone(),
                        pass_status: gate.pass_status.clone(),
                        pending_statuses: gate.pending_statuses.clone(),
                        timeout: gate
                            .timeout_secs
                            .map(Duration::from_secs)
                            .unwrap_or(defaults.gate_timeout),
                        poll_interval: gate
                            .poll_interval_secs
                            .map(Duration::from_secs)
                            .unwrap_or(defaults.gate_poll_interval),
                    })
                }
                None => None,
            };

            let credentials = def
                .credentials
                .iter()
                .map(|c| CredentialBinding {
                    id: c.id.clone(),
                    secret_var: c.secret_var.clone(),
                    username_var: c.username_var.clone(),
                })
                .collect();

            stages.push(Stage {
                name: def.name.clone(),
                steps,
                gate,
                credentials,
            });
        }

        Ok(Self { stages })
    }

    fn build_step(
        stage: &str,
        index: usize,
        config: &StepConfig,
        defaults: &StageDefaults,
        declared: &DeclaredNames,
    ) -> Result<Step, PipelineError> {
        let action = match (&config.run, &config.checkout) {
            (Some(command), None) => StepAction::Run { command: command.clone() },
            (None, Some(checkout)) => StepAction::Checkout { path: checkout.path.clone() },
            _ => {
                return Err(PipelineError::Config(format!(
                    "Step {} of stage '{}' must set exactly one of 'run' or 'checkout'",
                    index + 1,
                    stage
                )))
            }
        };

        if let Some(template) = action.template() {
            declared.check(stage, template)?;
        }
        let checkout_path = match &action {
            StepAction::Checkout { path } => path.as_ref(),
            StepAction::Run { .. } => None,
        };
        for path in checkout_path.into_iter().chain(config.working_dir.as_ref()) {
            if workspace_relative(path).is_err() {
                return Err(PipelineError::Config(format!(
                    "Stage '{}' uses path '{}' outside the run workspace",
                    stage, path
                )));
            }
        }
        if let Some(dir) = &config.working_dir {
            declared.check(stage, dir)?;
        }

        let name = config.name.clone().unwrap_or_else(|| match &action {
            StepAction::Run { command } => command.lines().next().unwrap_or_default().to_string(),
            StepAction::Checkout { .. } => "checkout".to_string(),
        });

        Ok(Step {
            name,
            action,
            working_dir: config.working_dir.clone(),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
        })
    }

    /// Create a graph directly from domain stages
    pub fn from_stages(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Stages in execution order
    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
