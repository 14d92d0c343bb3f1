//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "x ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Spinner shown while a stage waits on its gate
pub fn create_gate_spinner(stage: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.yellow} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Waiting on gate for {}", stage));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Horizontal rule across the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    style("─".repeat(width.min(120))).dim().to_string()
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Aborted => style("ABORTED").magenta().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Aborted => STOP,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    let mut line = format!(
        "{} {} - {} - {} ({}/{} stages)",
        status_icon,
        style(short_id(&summary.run_id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_stages,
        summary.total_stages,
    );
    if let Some(reason) = &summary.reason {
        line.push_str(&format!(" - {}", style(reason).dim()));
    }
    line
}

/// Format an execution event for display
///
/// Returns `None` for events that only drive the spinner.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted { run_id, pipeline_name } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_id(run_id)).dim()
        ),
        ExecutionEvent::StageStarted { stage } => {
            format!("{}\n{} {}", separator(), SPINNER, style(stage).cyan().bold())
        }
        ExecutionEvent::StepStarted { step, .. } => format!("  {} {}", style("▸").dim(), step),
        ExecutionEvent::StepOutput { output, .. } => format_output(output, 10),
        ExecutionEvent::GateWaiting { .. } => return None,
        ExecutionEvent::GatePassed { stage } => {
            format!("  {} Gate passed for {}", CHECK, style(stage).green())
        }
        ExecutionEvent::StageSucceeded { stage } => format!("{} {}", CHECK, style(stage).green()),
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::StageAborted { stage, reason } => {
            format!("{} {} aborted: {}", STOP, style(stage).magenta(), style(reason).bold())
        }
        ExecutionEvent::StageSkipped { stage } => format!("{} {}", SKIP, style(stage).dim()),
        ExecutionEvent::PipelineCompleted { run_id, status } => format!(
            "{}\n{} Pipeline ({}) {}",
            separator(),
            INFO,
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
        ExecutionEvent::HooksDispatched { invoked, failed } => {
            if *failed > 0 {
                format!("{} {} post hook(s) run, {} failed", WARN, invoked, style(failed).red())
            } else {
                format!("{} {} post hook(s) run", INFO, invoked)
            }
        }
    };
    Some(line)
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    let shown = if lines.len() <= max_lines {
        lines.join("\n    ")
    } else {
        format!(
            "{}\n    {} ({} more lines)",
            lines[..max_lines].join("\n    "),
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    };
    format!("    {}", shown)
}

/// Human-readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
