//! Rendering of run reports.

use crate::config::OutputFormat;
use anyhow::Result;
use console::style;
use gantry_core::run::{JobReport, Outcome, RunReport};
use std::fmt::Write;

/// Render a report in the requested format.
pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Table => render_table(report),
    })
}

fn render_table(report: &RunReport) -> String {
    let width = report
        .jobs
        .iter()
        .flat_map(|job| {
            std::iter::once(job.name.len()).chain(job.instances.iter().map(|i| i.name.len() + 2))
        })
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} {} on {} ({})",
        style("▶").cyan().bold(),
        style(&report.pipeline).bold(),
        style(&report.context.git_ref).dim(),
        report.context.kind
    );

    for job in &report.jobs {
        render_job(&mut out, job, width);
    }

    let _ = writeln!(
        out,
        "\n{} {} in {}",
        outcome_marker(report.outcome),
        styled_outcome(report.outcome),
        format_duration(report.duration_ms)
    );
    out
}

fn render_job(out: &mut String, job: &JobReport, width: usize) {
    let detail = match &job.skip_reason {
        Some(reason) => format!(" ({})", reason),
        None => String::new(),
    };
    let _ = writeln!(
        out,
        "  {} {:<width$}  {}{}",
        outcome_marker(job.outcome),
        job.name,
        styled_outcome(job.outcome),
        style(detail).dim(),
        width = width
    );

    // A plain job's single instance carries no extra information.
    if job.instances.len() < 2 || job.outcome == Outcome::Skipped {
        return;
    }
    for instance in &job.instances {
        let duration = instance
            .duration_ms
            .map(format_duration)
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "      {} {:<width$}  {} {}",
            outcome_marker(instance.outcome),
            instance.name,
            styled_outcome(instance.outcome),
            style(duration).dim(),
            width = width.saturating_sub(2)
        );
    }
}

fn outcome_marker(outcome: Outcome) -> console::StyledObject<&'static str> {
    match outcome {
        Outcome::Success => style("✓").green(),
        Outcome::Failure => style("✗").red(),
        Outcome::Cancelled => style("⊘").yellow(),
        Outcome::Skipped => style("-").dim(),
        Outcome::Pending | Outcome::Running => style("…").dim(),
    }
}

fn styled_outcome(outcome: Outcome) -> console::StyledObject<String> {
    let text = outcome.to_string();
    match outcome {
        Outcome::Success => style(text).green(),
        Outcome::Failure => style(text).red().bold(),
        Outcome::Cancelled => style(text).yellow(),
        _ => style(text).dim(),
    }
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}
