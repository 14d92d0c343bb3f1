//! Test: Outcome Dispatch - success hooks xor failure hooks, always hooks always

use crate::helpers::*;
use pipewright::core::{EnvCredentialProvider, ExecutionStatus};
use pipewright::execution::OutcomeDispatcher;
use std::sync::{Arc, Mutex};

const SIMPLE: &str = r#"
name: "Simple"
stages:
  - name: "Build"
    steps:
      - run: "make"
"#;

fn dispatcher(calls: &Arc<Mutex<Vec<String>>>) -> OutcomeDispatcher {
    OutcomeDispatcher::new()
        .always(RecordingHook::new("archive", calls))
        .on_success(RecordingHook::new("success", calls))
        .on_failure(RecordingHook::new("failure", calls))
}

async fn run_simple(mock: MockStepRunner, calls: &Arc<Mutex<Vec<String>>>) -> ExecutionStatus {
    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(&pipeline_from_yaml(SIMPLE), &[], workspace.path(), Arc::new(EnvCredentialProvider::new()));
    let (runner, _) = recording_runner(&Arc::new(mock), dispatcher(calls));
    runner.execute(run).await.status()
}

#[tokio::test]
async fn test_success_invokes_success_hooks_only() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let status = run_simple(MockStepRunner::new(), &calls).await;

    assert_eq!(status, ExecutionStatus::Succeeded);
    assert_eq!(*calls.lock().unwrap(), vec!["archive:Succeeded", "success:Succeeded"]);
}

#[tokio::test]
async fn test_failure_invokes_failure_hooks_only() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let status = run_simple(MockStepRunner::new().on("make", vec![Reply::fail("boom")]), &calls).await;

    assert_eq!(status, ExecutionStatus::Failed);
    assert_eq!(*calls.lock().unwrap(), vec!["archive:Failed", "failure:Failed"]);
}

/// A hook error is reported but neither stops other hooks nor changes the outcome
#[tokio::test]
async fn test_hook_error_is_contained() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = OutcomeDispatcher::new()
        .always(RecordingHook::failing("archive", &calls))
        .on_success(RecordingHook::new("success", &calls));

    let mock = Arc::new(MockStepRunner::new());
    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(&pipeline_from_yaml(SIMPLE), &[], workspace.path(), Arc::new(EnvCredentialProvider::new()));
    let (runner, _) = recording_runner(&mock, dispatcher);
    let report = runner.execute(run).await;

    assert_eq!(report.status(), ExecutionStatus::Succeeded);
    assert_eq!(*calls.lock().unwrap(), vec!["archive:Succeeded", "success:Succeeded"]);
    assert_eq!(report.hooks.failures.len(), 1);
    assert!(report.hooks.failures[0].1.contains("archive exploded"));
}

/// Hooks declared in YAML run through the step runner with outcome details
#[tokio::test]
async fn test_configured_command_hooks() {
    let yaml = r#"
name: "Notify"
stages:
  - name: "Build"
    steps:
      - run: "make"
post:
  success:
    - name: "celebrate"
      run: "notify ok {{ run.id }}"
  failure:
    - name: "alert"
      run: "notify failed"
"#;
    let config = pipeline_from_yaml(yaml);
    let mock = Arc::new(MockStepRunner::new().on("make", vec![Reply::fail("compile error")]));
    let workspace = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let dispatcher = OutcomeDispatcher::from_config(
        &config.post,
        archive.path(),
        mock.clone(),
        std::time::Duration::from_secs(5),
    );
    let run = prepare_run(&config, &[], workspace.path(), Arc::new(EnvCredentialProvider::new()));
    let (runner, _) = recording_runner(&mock, dispatcher);
    let report = runner.execute(run).await;

    assert_eq!(report.hooks.invoked, vec!["alert"]);
    assert!(!mock.ran("notify ok"));

    let alert = &mock.calls_matching("notify failed")[0];
    assert_eq!(alert.env_var("PIPEWRIGHT_STATUS"), Some("Failed"));
    assert!(alert.env_var("PIPEWRIGHT_ERROR").unwrap().contains("compile error"));
    assert_eq!(
        alert.env_var("PIPEWRIGHT_RUN_ID"),
        Some(report.run.id().to_string().as_str())
    );
}
