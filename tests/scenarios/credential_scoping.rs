//! Test: Credential Scoping - leases are released exactly once on every path

use crate::helpers::*;
use pipewright::core::{ExecutionStatus, PipelineError, Secret};
use pipewright::execution::{ExecutionEvent, OutcomeDispatcher};
use std::sync::Arc;

const PUSH: &str = r#"
name: "Publish"
stages:
  - name: "Push"
    credentials:
      - id: "registry"
        username_var: "REGISTRY_USER"
        secret_var: "REGISTRY_PASSWORD"
    steps:
      - run: "docker login"
      - run: "docker push app:latest"
  - name: "Announce"
    steps:
      - run: "announce"
"#;

fn provider() -> Arc<CountingProvider> {
    Arc::new(CountingProvider::new().with_secret("registry", Secret::new("hunter2-token").with_username("ci-bot")))
}

/// Secrets reach the stage's steps and are released once afterwards
#[tokio::test]
async fn test_released_once_on_success() {
    let provider = provider();
    let mock = Arc::new(MockStepRunner::new());

    let report = run_yaml(PUSH, &mock, provider.clone()).await;

    assert_eq!(report.status(), ExecutionStatus::Succeeded);
    assert_eq!(provider.acquired(), 1);
    assert_eq!(provider.released(), vec!["registry"]);
    assert_eq!(report.run.context().outstanding_credentials(), 0);

    let login = &mock.calls_matching("docker login")[0];
    assert_eq!(login.env_var("REGISTRY_PASSWORD"), Some("hunter2-token"));
    assert_eq!(login.env_var("REGISTRY_USER"), Some("ci-bot"));

    // Scoped to the stage only
    let announce = &mock.calls_matching("announce")[0];
    assert_eq!(announce.env_var("REGISTRY_PASSWORD"), None);
}

/// A failing step still releases the credential exactly once
#[tokio::test]
async fn test_released_once_on_failure() {
    let provider = provider();
    let mock = Arc::new(MockStepRunner::new().on("docker push", vec![Reply::fail("denied")]));

    let report = run_yaml(PUSH, &mock, provider.clone()).await;

    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_eq!(provider.acquired(), 1);
    assert_eq!(provider.released(), vec!["registry"]);
    assert_eq!(report.run.context().outstanding_credentials(), 0);
    assert!(!mock.ran("announce"));
}

/// An unknown credential fails the stage without running its steps
#[tokio::test]
async fn test_missing_credential_fails_stage() {
    let provider = Arc::new(CountingProvider::new());
    let mock = Arc::new(MockStepRunner::new());

    let report = run_yaml(PUSH, &mock, provider.clone()).await;

    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert!(matches!(
        report.first_error(),
        Some(PipelineError::Credential { id, .. }) if id == "registry"
    ));
    assert!(mock.commands().is_empty());
    assert!(provider.released().is_empty());
    assert_stage(&report, "Announce", "skipped");
}

/// Secret values never show up in step output events or errors
#[tokio::test]
async fn test_secret_masked_in_output() {
    let provider = provider();
    let mock = Arc::new(
        MockStepRunner::new()
            .on("docker login", vec![Reply::ok("logged in with hunter2-token")])
            .on("docker push", vec![Reply::Fail(1, "bad token hunter2-token".to_string())]),
    );
    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(&pipeline_from_yaml(PUSH), &[], workspace.path(), provider.clone());
    let (runner, events) = recording_runner(&mock, OutcomeDispatcher::new());

    let report = runner.execute(run).await;

    let events = events.lock().unwrap();
    let output = events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::StepOutput { output, .. } => Some(output.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(output, "logged in with ****");

    let error = report.first_error().unwrap().to_string();
    assert!(!error.contains("hunter2-token"));
    assert!(error.contains("****"));
}

/// Concurrent runs hold separate leases and separate workspaces
#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let provider = provider();
    let mock = Arc::new(MockStepRunner::new());
    let config = pipeline_from_yaml(PUSH);
    let root = tempfile::tempdir().unwrap();

    let first = prepare_run(&config, &[], root.path(), provider.clone());
    let second = prepare_run(&config, &[], root.path(), provider.clone());
    assert_ne!(first.context().workspace(), second.context().workspace());

    let (runner, _) = recording_runner(&mock, OutcomeDispatcher::new());
    let (a, b) = tokio::join!(runner.execute(first), runner.execute(second));

    assert_eq!(a.status(), ExecutionStatus::Succeeded);
    assert_eq!(b.status(), ExecutionStatus::Succeeded);
    assert!(!a.run.context().workspace().exists());
    assert!(!b.run.context().workspace().exists());
    assert_eq!(provider.acquired(), 2);
    assert_eq!(provider.released().len(), 2);
}
