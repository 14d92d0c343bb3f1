//! Test: Gate Behavior - polling, rejection and timeouts

use crate::helpers::*;
use pipewright::core::{
    AbortReason, EnvCredentialProvider, ExecutionContext, ExecutionStatus, GateSpec, Outcome,
    PipelineError, PipelineRun, Stage, StageGraph, Step, StepAction,
};
use pipewright::execution::{ArchiveHook, ExecutionEvent, OutcomeDispatcher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const GATED: &str = r#"
name: "Gated"
defaults:
  gate_poll_interval_secs: 0
stages:
  - name: "Analysis"
    steps:
      - run: "sonar-scanner"
    gate:
      check: "quality-status"
      timeout_secs: 10
  - name: "Deploy"
    steps:
      - run: "deploy.sh"
"#;

/// A gate answering OK after pending polls lets the run continue
#[tokio::test]
async fn test_gate_passes_after_pending() {
    let mock = Arc::new(MockStepRunner::new().on(
        "quality-status",
        vec![Reply::ok("PENDING"), Reply::ok("IN_PROGRESS\n"), Reply::ok("OK\n")],
    ));
    let workspace = tempfile::tempdir().unwrap();
    let run = prepare_run(&pipeline_from_yaml(GATED), &[], workspace.path(), Arc::new(EnvCredentialProvider::new()));
    let (runner, events) = recording_runner(&mock, OutcomeDispatcher::new());

    let report = runner.execute(run).await;

    assert_eq!(report.status(), ExecutionStatus::Succeeded);
    assert_eq!(mock.calls_matching("quality-status").len(), 3);
    assert!(mock.ran("deploy.sh"));

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::GatePassed { stage } if stage == "Analysis")));
}

/// Gate returns "ERROR": Aborted with the reason verbatim, archival still runs
#[tokio::test]
async fn test_gate_error_aborts_and_archives() {
    let mock = Arc::new(MockStepRunner::new().on("quality-status", vec![Reply::ok("ERROR\n")]));
    let workspace = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let archive_hook = ArchiveHook::new("archive", Vec::new(), archive.path());
    let dispatcher = OutcomeDispatcher::new()
        .always(archive_hook)
        .on_success(RecordingHook::new("notify-success", &calls))
        .on_failure(RecordingHook::new("notify-failure", &calls));

    let run = prepare_run(&pipeline_from_yaml(GATED), &[], workspace.path(), Arc::new(EnvCredentialProvider::new()));
    let run_id = run.id();
    let (runner, _) = recording_runner(&mock, dispatcher);
    let report = runner.execute(run).await;

    assert_eq!(report.status(), ExecutionStatus::Aborted);
    assert_eq!(
        report.outcome(),
        Some(&Outcome::Aborted {
            reason: AbortReason::GateRejected("ERROR".to_string())
        })
    );
    assert_stage(&report, "Analysis", "aborted");
    assert_stage(&report, "Deploy", "skipped");
    assert!(!mock.ran("deploy.sh"));

    assert_eq!(report.hooks.invoked, vec!["archive", "notify-failure"]);
    assert!(report.hooks.is_clean());
    assert_eq!(*calls.lock().unwrap(), vec!["notify-failure:Aborted"]);

    let manifest = std::fs::read_to_string(archive.path().join(run_id.to_string()).join("outcome.json")).unwrap();
    assert!(manifest.contains("\"Aborted\""));
    assert!(manifest.contains("ERROR"));
}

/// Any non-OK, non-pending status is kept exactly as reported
#[tokio::test]
async fn test_rejection_status_is_verbatim() {
    let mock = Arc::new(MockStepRunner::new().on("quality-status", vec![Reply::ok("WARN: coverage 41%\n")]));
    let report = run_yaml(GATED, &mock, Arc::new(EnvCredentialProvider::new())).await;

    assert_eq!(
        report.first_error(),
        Some(&PipelineError::GateRejected {
            stage: "Analysis".to_string(),
            status: "WARN: coverage 41%".to_string(),
        })
    );
}

/// A gate that never answers aborts the run with a timeout reason
#[tokio::test]
async fn test_gate_timeout_aborts() {
    let mock = Arc::new(MockStepRunner::new().on("quality-status", vec![Reply::ok("PENDING")]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = OutcomeDispatcher::new().always(RecordingHook::new("archive", &calls));

    let gate = GateSpec {
        check: "quality-status".to_string(),
        pass_status: "OK".to_string(),
        pending_statuses: vec!["PENDING".to_string()],
        timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
    };
    let stages = vec![
        Stage {
            name: "Analysis".to_string(),
            steps: vec![Step {
                name: "scan".to_string(),
                action: StepAction::Run {
                    command: "sonar-scanner".to_string(),
                },
                working_dir: None,
                timeout: Duration::from_secs(5),
            }],
            gate: Some(gate),
            credentials: Vec::new(),
        },
        Stage {
            name: "Deploy".to_string(),
            steps: vec![Step {
                name: "deploy".to_string(),
                action: StepAction::Run {
                    command: "deploy.sh".to_string(),
                },
                working_dir: None,
                timeout: Duration::from_secs(5),
            }],
            gate: None,
            credentials: Vec::new(),
        },
    ];

    let workspace = tempfile::tempdir().unwrap();
    let context = ExecutionContext::new(
        Uuid::new_v4(),
        workspace.path().join("run"),
        Arc::new(EnvCredentialProvider::new()),
    );
    let run = PipelineRun::new("Timeouts", StageGraph::from_stages(stages), context);

    let (runner, _) = recording_runner(&mock, dispatcher);
    let report = runner.execute(run).await;

    assert_eq!(report.status(), ExecutionStatus::Aborted);
    assert_eq!(
        report.outcome(),
        Some(&Outcome::Aborted {
            reason: AbortReason::Timeout {
                after: Duration::from_millis(100)
            }
        })
    );
    assert!(mock.calls_matching("quality-status").len() >= 2);
    assert!(!mock.ran("deploy.sh"));
    assert_eq!(*calls.lock().unwrap(), vec!["archive:Aborted"]);
}

/// A failing check command counts as no answer rather than a rejection
#[tokio::test]
async fn test_failing_check_keeps_polling() {
    let mock = Arc::new(MockStepRunner::new().on(
        "quality-status",
        vec![Reply::fail("connection refused"), Reply::ok("OK")],
    ));
    let report = run_yaml(GATED, &mock, Arc::new(EnvCredentialProvider::new())).await;

    assert_eq!(report.status(), ExecutionStatus::Succeeded);
    assert_eq!(mock.calls_matching("quality-status").len(), 2);
}
