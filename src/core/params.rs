//! Typed parameter declarations and `{{ ... }}` template substitution
//!
//! Parameter values never reach a command line unchecked: every value is
//! validated against its declaration before it can be substituted.

use crate::core::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Characters accepted in string parameters that declare no pattern
pub const DEFAULT_ALLOWED_PATTERN: &str = r"^[A-Za-z0-9._:/@+=,-]*$";

/// Repository references: URLs, scp-style `user@host:path` and local paths
pub const REPOSITORY_PATTERN: &str = r"^[A-Za-z0-9._~/][A-Za-z0-9._~:/@+%=-]*$";

/// Branch names; a leading `-` would read as an option
pub const BRANCH_PATTERN: &str = r"^[A-Za-z0-9._/][A-Za-z0-9._:/@+=,-]*$";

/// Declaration of a pipeline parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterSpec {
    /// Free-form string restricted by an allow-list pattern
    String {
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    /// One value out of an enumerated set (first entry is the default)
    Choice {
        choices: Vec<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ParameterSpec {
    /// Value used when the trigger does not supply one
    pub fn default_value(&self) -> Option<&str> {
        match self {
            ParameterSpec::String { default, .. } => default.as_deref(),
            ParameterSpec::Choice { choices, .. } => choices.first().map(String::as_str),
        }
    }

    /// Check the declaration itself (pattern compiles, choices non-empty)
    pub fn check(&self, name: &str) -> Result<(), PipelineError> {
        match self {
            ParameterSpec::String { pattern, default, .. } => {
                let regex = compile_pattern(name, pattern.as_deref())?;
                if let Some(default) = default {
                    if !regex.is_match(default) {
                        return Err(PipelineError::Config(format!(
                            "Default value of parameter '{}' does not match its pattern",
                            name
                        )));
                    }
                }
                Ok(())
            }
            ParameterSpec::Choice { choices, .. } => {
                if choices.is_empty() {
                    return Err(PipelineError::Config(format!(
                        "Choice parameter '{}' declares no choices",
                        name
                    )));
                }
                Ok(())
            }
        }
    }

    /// Validate a concrete value against this declaration
    pub fn validate(&self, name: &str, value: &str) -> Result<(), PipelineError> {
        match self {
            ParameterSpec::String { pattern, .. } => {
                let regex = compile_pattern(name, pattern.as_deref())?;
                if regex.is_match(value) {
                    Ok(())
                } else {
                    Err(PipelineError::InvalidParameter {
                        name: name.to_string(),
                        reason: format!("'{}' does not match {}", value, regex.as_str()),
                    })
                }
            }
            ParameterSpec::Choice { choices, .. } => {
                if choices.iter().any(|c| c == value) {
                    Ok(())
                } else {
                    Err(PipelineError::InvalidParameter {
                        name: name.to_string(),
                        reason: format!("'{}' is not one of [{}]", value, choices.join(", ")),
                    })
                }
            }
        }
    }
}

fn compile_pattern(name: &str, pattern: Option<&str>) -> Result<Regex, PipelineError> {
    let source = match pattern {
        // Patterns must cover the whole value
        Some(p) => format!("^(?:{})$", p.trim_start_matches('^').trim_end_matches('$')),
        None => DEFAULT_ALLOWED_PATTERN.to_string(),
    };
    Regex::new(&source).map_err(|e| {
        PipelineError::Config(format!("Invalid pattern for parameter '{}': {}", name, e))
    })
}

/// Check a trigger-supplied value against a fixed allow-list
pub fn check_allowed(name: &str, value: &str, pattern: &str) -> Result<(), PipelineError> {
    let regex = Regex::new(pattern)
        .map_err(|e| PipelineError::Config(format!("Invalid pattern for '{}': {}", name, e)))?;
    if regex.is_match(value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("'{}' does not match {}", value, pattern),
        })
    }
}

/// Resolve the final parameter values for a run
///
/// Overrides win over defaults. Every value, including defaults, is
/// validated. Overrides for undeclared parameters are rejected.
pub fn bind_parameters(
    specs: &BTreeMap<String, ParameterSpec>,
    overrides: &HashMap<String, String>,
) -> Result<BTreeMap<String, String>, PipelineError> {
    if let Some(unknown) = overrides.keys().find(|k| !specs.contains_key(*k)) {
        return Err(PipelineError::InvalidParameter {
            name: unknown.clone(),
            reason: "parameter is not declared by the pipeline".to_string(),
        });
    }

    let mut bound = BTreeMap::new();
    for (name, spec) in specs {
        let value = match overrides.get(name) {
            Some(v) => v.clone(),
            None => spec
                .default_value()
                .map(str::to_string)
                .ok_or_else(|| PipelineError::MissingParameter(name.clone()))?,
        };
        spec.validate(name, &value)?;
        bound.insert(name.clone(), value);
    }
    Ok(bound)
}

/// A name referenced from a `{{ ... }}` placeholder
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// `{{ name }}` or `{{ params.name }}`
    Param(String),
    /// `{{ env.NAME }}`
    Env(String),
    /// `{{ tools.name }}`
    Tool(String),
    /// `{{ run.id }}`
    RunId,
    /// `{{ run.workspace }}`
    Workspace,
    /// `{{ trigger.repository }}`
    Repository,
    /// `{{ trigger.branch }}`
    Branch,
}

impl Reference {
    /// Parse the inside of a placeholder
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        match raw.split_once('.') {
            None => Ok(Reference::Param(raw.to_string())),
            Some(("params", name)) => Ok(Reference::Param(name.to_string())),
            Some(("env", name)) => Ok(Reference::Env(name.to_string())),
            Some(("tools", name)) => Ok(Reference::Tool(name.to_string())),
            Some(("run", "id")) => Ok(Reference::RunId),
            Some(("run", "workspace")) => Ok(Reference::Workspace),
            Some(("trigger", "repository")) => Ok(Reference::Repository),
            Some(("trigger", "branch")) => Ok(Reference::Branch),
            _ => Err(PipelineError::Config(format!("Unknown placeholder '{{{{ {} }}}}'", raw))),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Param(name) => write!(f, "{}", name),
            Reference::Env(name) => write!(f, "env.{}", name),
            Reference::Tool(name) => write!(f, "tools.{}", name),
            Reference::RunId => write!(f, "run.id"),
            Reference::Workspace => write!(f, "run.workspace"),
            Reference::Repository => write!(f, "trigger.repository"),
            Reference::Branch => write!(f, "trigger.branch"),
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// All references in a template, in order of appearance
pub fn references(template: &str) -> Result<Vec<Reference>, PipelineError> {
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| Reference::parse(&caps[1]))
        .collect()
}

/// Replace every placeholder using `lookup`
///
/// Fails with `MissingParameter` on the first reference `lookup` cannot
/// resolve.
pub fn substitute<F>(template: &str, lookup: F) -> Result<String, PipelineError>
where
    F: Fn(&Reference) -> Option<String>,
{
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let reference = Reference::parse(&caps[1])?;
        let value = lookup(&reference)
            .ok_or_else(|| PipelineError::MissingParameter(reference.to_string()))?;
        rendered.push_str(&template[last..whole.start]);
        rendered.push_str(&value);
        last = whole.end;
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}
