//! Test: Stage Ordering - strict sequence and halting on failure

use crate::helpers::*;
use pipewright::core::{EnvCredentialProvider, ExecutionStatus, Outcome, PipelineError};
use pipewright::execution::OutcomeDispatcher;
use std::sync::{Arc, Mutex};

const CHECKOUT_TEST_BUILD: &str = r#"
name: "Service CI"
stages:
  - name: "Checkout"
    steps:
      - checkout: {}
  - name: "Test"
    steps:
      - run: "make test"
  - name: "Build"
    steps:
      - run: "make build"
"#;

/// Stages run in declaration order when all succeed
#[tokio::test]
async fn test_all_stages_run_in_order() {
    let mock = Arc::new(MockStepRunner::new());
    let report = run_yaml(CHECKOUT_TEST_BUILD, &mock, Arc::new(EnvCredentialProvider::new())).await;

    assert_eq!(report.status(), ExecutionStatus::Succeeded);
    assert_eq!(report.outcome(), Some(&Outcome::Succeeded));
    assert!(report.first_error().is_none());
    assert_executed_stages(&report, &["Checkout", "Test", "Build"]);

    let commands = mock.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands[0].starts_with("git clone --branch main -- https://git.example.com/app.git"));
    assert_eq!(commands[1], "make test");
    assert_eq!(commands[2], "make build");
}

/// [Checkout, Test, Build] with Test failing: Build never runs, failure hooks once
#[tokio::test]
async fn test_failing_stage_halts_later_stages() {
    let mock = Arc::new(MockStepRunner::new().on("make test", vec![Reply::fail("2 tests failed")]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = OutcomeDispatcher::new()
        .on_success(RecordingHook::new("notify-success", &calls))
        .on_failure(RecordingHook::new("notify-failure", &calls));

    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(
        &pipeline_from_yaml(CHECKOUT_TEST_BUILD),
        &[],
        workspace.path(),
        Arc::new(EnvCredentialProvider::new()),
    );
    let (runner, _) = recording_runner(&mock, dispatcher);
    let report = runner.execute(run).await;

    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_stage(&report, "Checkout", "succeeded");
    assert_stage(&report, "Test", "failed");
    assert_stage(&report, "Build", "skipped");
    assert!(!mock.ran("make build"));

    match report.first_error() {
        Some(PipelineError::StageExecution { stage, message }) => {
            assert_eq!(stage, "Test");
            assert!(message.contains("2 tests failed"));
        }
        other => panic!("Expected stage failure, got {:?}", other),
    }

    assert_eq!(*calls.lock().unwrap(), vec!["notify-failure:Failed"]);
}

/// A failing step stops the remaining steps of its own stage
#[tokio::test]
async fn test_failing_step_stops_stage() {
    let yaml = r#"
name: "Multi Step"
stages:
  - name: "Build"
    steps:
      - run: "cargo fmt --check"
      - run: "cargo build"
"#;
    let mock = Arc::new(MockStepRunner::new().on("fmt", vec![Reply::fail("diff")]));
    let report = run_yaml(yaml, &mock, Arc::new(EnvCredentialProvider::new())).await;

    assert_eq!(report.status(), ExecutionStatus::Failed);
    assert_eq!(mock.commands(), vec!["cargo fmt --check"]);
}

/// The run report keeps every stage in its original order
#[tokio::test]
async fn test_stage_records_follow_graph_order() {
    let mock = Arc::new(MockStepRunner::new().on("make test", vec![Reply::fail("boom")]));
    let report = run_yaml(CHECKOUT_TEST_BUILD, &mock, Arc::new(EnvCredentialProvider::new())).await;

    let names: Vec<&str> = report.run.stages().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Checkout", "Test", "Build"]);
    assert_executed_stages(&report, &["Checkout", "Test"]);
    assert!((report.run.progress() - 1.0).abs() < f64::EPSILON);
}
