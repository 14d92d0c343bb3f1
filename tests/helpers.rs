//! Test utility functions for pipewright scenarios

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use pipewright::core::config::PipelineConfig;
use pipewright::core::{
    CredentialError, CredentialProvider, PipelineRun, RunRequest, Secret, StageState, TriggerInfo,
};
use pipewright::execution::{ExecutionEvent, OutcomeDispatcher, PostHook, RunReport, Runner};
use pipewright::tools::{CommandLine, StepInvocation, StepRunner, ToolError, ToolOutput};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a scripted command answers
#[derive(Debug, Clone)]
pub enum Reply {
    /// Succeed with this stdout
    Ok(String),
    /// Exit non-zero with this stderr
    Fail(i32, String),
    /// Succeed with empty output after a delay
    Slow(Duration),
    /// Never answer
    Hang,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Ok(stdout.to_string())
    }

    pub fn fail(stderr: &str) -> Self {
        Reply::Fail(1, stderr.to_string())
    }
}

/// An invocation seen by the mock runner
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: String,
    pub env: Vec<(String, String)>,
}

impl RecordedCall {
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Mock step runner with replies scripted per command substring
///
/// Commands matching no script succeed with empty output. A script with
/// several replies answers them in order and repeats the last one.
#[derive(Default)]
pub struct MockStepRunner {
    scripts: Mutex<Vec<(String, VecDeque<Reply>)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockStepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the replies for commands containing `pattern`
    pub fn on(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push((pattern.to_string(), replies.into()));
        self
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.command.clone()).collect()
    }

    /// Calls whose command contains `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command.contains(pattern))
            .cloned()
            .collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        !self.calls_matching(pattern).is_empty()
    }

    fn reply_for(&self, command: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.iter_mut().find(|(pattern, _)| command.contains(pattern.as_str())) {
            Some((_, replies)) if replies.len() > 1 => replies.pop_front().unwrap_or(Reply::ok("")),
            Some((_, replies)) => replies.front().cloned().unwrap_or(Reply::ok("")),
            None => Reply::ok(""),
        }
    }
}

#[async_trait]
impl StepRunner for MockStepRunner {
    async fn run(&self, invocation: &StepInvocation) -> Result<ToolOutput, ToolError> {
        let command = match &invocation.command {
            CommandLine::Shell(script) => script.clone(),
            exec => exec.to_string(),
        };

        self.calls.lock().unwrap().push(RecordedCall {
            command: command.clone(),
            env: invocation.env.clone(),
        });

        match self.reply_for(&command) {
            Reply::Ok(stdout) => Ok(ToolOutput::new(stdout)),
            Reply::Fail(code, stderr) => Err(ToolError::Exit { code, stderr }),
            Reply::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ToolOutput::default())
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ToolError::Timeout(3600))
            }
        }
    }
}

/// Credential provider that counts acquisitions and releases
#[derive(Default)]
pub struct CountingProvider {
    secrets: HashMap<String, Secret>,
    acquired: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl CountingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, id: &str, secret: Secret) -> Self {
        self.secrets.insert(id.to_string(), secret);
        self
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn acquire(&self, id: &str) -> Result<Secret, CredentialError> {
        let secret = self
            .secrets
            .get(id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(id.to_string()))?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(secret)
    }

    fn release(&self, id: &str) {
        self.released.lock().unwrap().push(id.to_string());
    }
}

/// Hook that records its name and the run status when invoked
pub struct RecordingHook {
    name: String,
    calls: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingHook {
    pub fn new(name: &str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            calls: calls.clone(),
            fail: false,
        }
    }

    pub fn failing(name: &str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            fail: true,
            ..Self::new(name, calls)
        }
    }
}

#[async_trait]
impl PostHook for RecordingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, run: &PipelineRun) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, run.status().as_str()));
        if self.fail {
            anyhow::bail!("{} exploded", self.name);
        }
        Ok(())
    }
}

/// Parse and validate a pipeline definition
pub fn pipeline_from_yaml(yaml: &str) -> PipelineConfig {
    PipelineConfig::from_yaml(yaml).expect("pipeline should be valid")
}

/// Prepare a run with trigger input and parameter overrides
pub fn prepare_run(
    config: &PipelineConfig,
    params: &[(&str, &str)],
    workspace_root: &Path,
    provider: Arc<dyn CredentialProvider>,
) -> PipelineRun {
    let request = RunRequest {
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        trigger: TriggerInfo::new("https://git.example.com/app.git", "main"),
    };
    PipelineRun::from_config(config, request, workspace_root, provider).expect("run should prepare")
}

/// Runner over a shared mock, recording every event
pub fn recording_runner(
    mock: &Arc<MockStepRunner>,
    dispatcher: OutcomeDispatcher,
) -> (Runner<Arc<MockStepRunner>>, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut runner = Runner::new(mock.clone(), dispatcher);
    let sink = events.clone();
    runner.add_event_handler(move |event| sink.lock().unwrap().push(event));
    (runner, events)
}

/// Run a YAML pipeline against a mock with no hooks
pub async fn run_yaml(yaml: &str, mock: &Arc<MockStepRunner>, provider: Arc<dyn CredentialProvider>) -> RunReport {
    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(&pipeline_from_yaml(yaml), &[], workspace.path(), provider);
    let (runner, _) = recording_runner(mock, OutcomeDispatcher::new());
    runner.execute(run).await
}

/// Assert that a stage reached the given kind of state
pub fn assert_stage(report: &RunReport, stage: &str, expected: &str) {
    let state = report
        .run
        .stage_state(stage)
        .unwrap_or_else(|| panic!("Stage {} not found", stage));

    let actual = match state {
        StageState::Pending => "pending",
        StageState::Running { .. } => "running",
        StageState::Succeeded { .. } => "succeeded",
        StageState::Failed { .. } => "failed",
        StageState::Aborted { .. } => "aborted",
        StageState::Skipped => "skipped",
    };
    assert_eq!(actual, expected, "Stage {} is {:?}", stage, state);
}

/// Assert which stages actually ran, in order
pub fn assert_executed_stages(report: &RunReport, expected: &[&str]) {
    assert_eq!(report.run.executed_stages(), expected);
}
