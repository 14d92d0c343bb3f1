use anyhow::{Context, Result};
use pipewright::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use pipewright::cli::output::*;
use pipewright::cli::{Cli, Command};
use pipewright::core::config::PipelineConfig;
use pipewright::core::{EnvCredentialProvider, ExecutionStatus, PipelineRun, RunRequest, StageDefaults, TriggerInfo};
use pipewright::execution::{AbortSignal, ExecutionEvent, OutcomeDispatcher, Runner, RunnerConfig};
use pipewright::persistence::{create_summary, PersistenceBackend, RunSummary, SqliteRunStore};
use pipewright::tools::ShellRunner;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over the flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => {
            let code = run_pipeline(cmd).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Process exit code for a finished run
fn exit_code(status: ExecutionStatus) -> i32 {
    match status {
        ExecutionStatus::Succeeded => 0,
        ExecutionStatus::Aborted => 2,
        _ => 1,
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let mut runner_config = RunnerConfig::default();
    if let Some(root) = &cmd.workspace_root {
        runner_config = runner_config.with_workspace_root(root);
    }
    if let Some(root) = &cmd.archive_root {
        runner_config = runner_config.with_archive_root(root);
    }
    runner_config = runner_config.with_keep_workspaces(cmd.keep_workspace);

    let request = RunRequest {
        params: cmd.param.iter().cloned().collect(),
        trigger: TriggerInfo {
            repository: cmd.repo.clone(),
            branch: cmd.branch.clone(),
        },
    };

    let run = match PipelineRun::from_config(
        &config,
        request,
        &runner_config.workspace_root,
        Arc::new(EnvCredentialProvider::new()),
    ) {
        Ok(run) => run,
        Err(e) => {
            println!("{} {}", CROSS, style(&e).red());
            return Ok(1);
        }
    };

    for (key, value) in run.context().params() {
        println!("{} Parameter: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }

    // Set up persistence
    let store: Option<Arc<dyn PersistenceBackend>> = if cmd.no_history {
        None
    } else {
        Some(Arc::new(SqliteRunStore::with_default_path().await?))
    };

    let shell = Arc::new(ShellRunner::new());
    let hook_timeout = config
        .defaults
        .step_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(StageDefaults::default().step_timeout);
    let dispatcher = OutcomeDispatcher::from_config(&config.post, &runner_config.archive_root, shell.clone(), hook_timeout);

    let signal = AbortSignal::new();
    let mut runner = Runner::new(shell, dispatcher).keep_workspaces(runner_config.keep_workspaces);

    // Ctrl-C interrupts the running stage; hooks still run
    let interrupt = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting run");
            interrupt.abort("interrupted by user");
        }
    });

    // Set up event handler for console output
    let spinner = Mutex::new(None);
    runner.add_event_handler(move |event| {
        let mut spinner = spinner.lock().unwrap_or_else(|e| e.into_inner());
        match &event {
            ExecutionEvent::GateWaiting { stage, polls } => {
                let bar = spinner.get_or_insert_with(|| create_gate_spinner(stage));
                if *polls > 0 {
                    bar.set_message(format!("Waiting on gate for {} (poll {})", stage, polls));
                }
            }
            _ => {
                if let Some(bar) = spinner.take() {
                    bar.finish_and_clear();
                }
            }
        }
        if let Some(line) = format_execution_event(&event) {
            println!("{}", line);
        }
    });

    // Execute pipeline
    println!();
    let report = runner.execute_with_abort(run, &signal).await;

    // Save to history
    if let Some(store) = &store {
        let summary = create_summary(&report.run);
        match store.save_run(&summary).await {
            Ok(()) => println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            ),
            Err(e) => error!("Failed to save run history: {:#}", e),
        }
    }

    for (hook, message) in &report.hooks.failures {
        println!("{} Post hook {} failed: {}", WARN, style(hook).yellow(), style(message).dim());
    }

    // Print final status
    let status = report.status();
    match status {
        ExecutionStatus::Succeeded => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&config.name).bold(),
            style("successfully").green()
        ),
        _ => {
            let reason = report
                .first_error()
                .map(|e| report.run.context().mask(&e.to_string()))
                .unwrap_or_default();
            println!(
                "\n{} {} {}: {}",
                if status == ExecutionStatus::Aborted { STOP } else { CROSS },
                style(&config.name).bold(),
                format_status(status),
                reason
            );
        }
    }

    Ok(exit_code(status))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            for stage in &config.stages {
                let gated = if stage.gate.is_some() { " (gated)" } else { "" };
                println!("    - {}{}", stage.name, style(gated).dim());
            }
            println!("  Parameters: {}", style(config.parameters.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = SqliteRunStore::with_default_path().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let runs = store.list_runs(pipeline_name).await?;
            let count = |status: ExecutionStatus| runs.iter().filter(|r| r.status == status).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} aborted)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(count(ExecutionStatus::Succeeded)).green(),
                style(count(ExecutionStatus::Failed)).red(),
                style(count(ExecutionStatus::Aborted)).magenta()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = SqliteRunStore::with_default_path().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_runs(pipeline_name).await?
    } else {
        let mut all_runs = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all_runs.extend(store.list_runs(&pipeline).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(reason) = &summary.reason {
        println!("  Reason: {}", style(reason).yellow());
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(finished) = summary.finished_at {
        println!("  Finished: {}", style(finished.to_rfc3339()).dim());
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!("  Stages: {}/{} succeeded", summary.succeeded_stages, summary.total_stages);

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
