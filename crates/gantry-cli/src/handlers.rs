//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::output::render_report;
use anyhow::{Context, Result, bail};
use console::style;
use gantry_core::events::{ActivationContext, Event};
use gantry_core::pipeline::PipelineDefinition;
use gantry_core::ports::StepExecutor;
use gantry_core::run::{Outcome, SkipReason};
use gantry_core::secrets::SecretStore;
use gantry_runner::{DryRunExecutor, RunnerConfig, ShellExecutor};
use gantry_scheduler::{
    ConditionalGate, ExecutionPlan, Readiness, Scheduler, SchedulerConfig, TriggerEvaluator,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Starter pipeline written by `gantry init`.
pub const DEMO_PIPELINE: &str = include_str!("../../../demos/ci.yaml");

/// Write a starter pipeline.
pub async fn init(path: &Path) -> Result<()> {
    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    tokio::fs::write(path, DEMO_PIPELINE)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Validate a pipeline configuration.
pub async fn validate(config: &CliConfig, path: Option<PathBuf>) -> Result<()> {
    let path = pipeline_path(config, path);
    let plan = load_plan(&path).await?;

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        plan.name()
    );
    println!(
        "  Jobs: {}, instances: {}",
        plan.graph().len(),
        plan.total_instances()
    );

    for &index in plan.graph().topological_order() {
        let job = plan.job(index);
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" needs {}", job.needs.join(", "))
        };
        println!(
            "    - {} ({} steps, {} instances){}",
            job.name,
            job.steps.len(),
            plan.instances(index).len(),
            style(needs).dim()
        );
    }

    Ok(())
}

/// A job as `gantry plan` predicts it, assuming every step succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub name: String,
    pub instances: Vec<String>,
    pub skip_reason: Option<SkipReason>,
}

/// Predict which jobs would run for an activation context.
pub fn predict(plan: &ExecutionPlan, ctx: &ActivationContext) -> Vec<PlannedJob> {
    let graph = plan.graph();
    let gate = ConditionalGate::new();
    let mut outcomes = vec![Outcome::Pending; graph.len()];
    let mut planned = Vec::with_capacity(graph.len());

    for &index in graph.topological_order() {
        let job = plan.job(index);
        let skip_reason = match graph.readiness(index, &outcomes) {
            Readiness::Blocked(dep) => Some(SkipReason::Upstream {
                job: graph.job(dep).name.clone(),
                outcome: outcomes[dep.index()],
            }),
            _ if !gate.allowed(job, ctx) => Some(SkipReason::ConditionUnmet),
            _ => None,
        };

        outcomes[index.index()] = if skip_reason.is_some() {
            Outcome::Skipped
        } else {
            Outcome::Success
        };
        planned.push(PlannedJob {
            name: job.name.clone(),
            instances: plan
                .instances(index)
                .iter()
                .map(|i| i.name.clone())
                .collect(),
            skip_reason,
        });
    }

    planned
}

/// Show what an event would run.
pub async fn plan(config: &CliConfig, target: EventArgs) -> Result<()> {
    let path = pipeline_path(config, target.path.clone());
    let plan = load_plan(&path).await?;
    let event = resolve_event(&target).await?;

    let Some(ctx) =
        TriggerEvaluator::new().activate(plan.definition().triggers.as_ref(), &event)
    else {
        println!(
            "{} {} does not activate \"{}\"",
            style("i").blue(),
            event,
            plan.name()
        );
        return Ok(());
    };

    println!(
        "\n{} {} on {} ({})",
        style("▶").cyan().bold(),
        style(plan.name()).bold(),
        style(&ctx.git_ref).dim(),
        ctx.kind
    );

    for job in predict(&plan, &ctx) {
        match &job.skip_reason {
            Some(reason) => println!(
                "  {} {} {}",
                style("-").dim(),
                job.name,
                style(format!("skipped ({})", reason)).dim()
            ),
            None => {
                println!("  {} {}", style("▶").cyan(), job.name);
                if job.instances.len() > 1 {
                    for instance in &job.instances {
                        println!("      {}", style(instance).dim());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Run a pipeline locally.
pub async fn run(
    config: &CliConfig,
    target: EventArgs,
    dry_run: bool,
    max_workers: Option<usize>,
    output: Option<OutputFormat>,
) -> Result<ExitCode> {
    let path = pipeline_path(config, target.path.clone());
    let plan = load_plan(&path).await?;
    let event = resolve_event(&target).await?;

    let runner_config = RunnerConfig::new()
        .with_shell(config.shell.clone())
        .with_timeout(config.step_timeout_secs.map(Duration::from_secs));
    let executor: Arc<dyn StepExecutor> = if dry_run {
        Arc::new(DryRunExecutor::new(runner_config))
    } else {
        Arc::new(ShellExecutor::new(runner_config))
    };

    let secrets = SecretStore::from_env(requested_secrets(plan.definition()).iter().map(String::as_str));
    debug!(secrets = secrets.len(), "Loaded secrets from environment");

    let mut scheduler_config = SchedulerConfig::new();
    if let Some(workers) = max_workers.or(config.max_workers) {
        scheduler_config = scheduler_config.with_max_workers(workers);
    }

    let scheduler = Scheduler::new(executor)
        .with_config(scheduler_config)
        .with_secrets(secrets);

    let Some(report) = scheduler.handle_event(&plan, &event).await else {
        println!(
            "{} {} does not activate \"{}\"",
            style("i").blue(),
            event,
            plan.name()
        );
        return Ok(ExitCode::SUCCESS);
    };

    let format = output.unwrap_or(config.output_format);
    println!("{}", render_report(&report, format)?);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Print the pipeline JSON schema.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(PipelineDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    println!(
        "  max_workers: {}",
        config
            .max_workers
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(available cores)".to_string())
    );
    println!("  shell: {}", config.shell);
    println!(
        "  step_timeout_secs: {}",
        config
            .step_timeout_secs
            .map(|n| n.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("  output_format: {:?}", config.output_format);
    println!("  pipeline_path: {}", config.pipeline_path.display());

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    if let Err(e) = config.set(key, value) {
        bail!(e);
    }
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

fn pipeline_path(config: &CliConfig, path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| config.pipeline_path.clone())
}

async fn load_plan(path: &Path) -> Result<ExecutionPlan> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    ExecutionPlan::from_yaml(&content).with_context(|| format!("invalid pipeline {}", path.display()))
}

/// Every secret name some step asks for.
fn requested_secrets(definition: &PipelineDefinition) -> BTreeSet<String> {
    definition
        .jobs
        .iter()
        .flat_map(|job| &job.steps)
        .flat_map(|step| step.secrets.iter().cloned())
        .collect()
}

async fn resolve_event(target: &EventArgs) -> Result<Event> {
    let git_ref = match &target.git_ref {
        Some(git_ref) => git_ref.clone(),
        None => current_ref().await?,
    };
    let event = Event::new(target.event, git_ref);
    event.validate()?;
    Ok(event)
}

/// The checked-out branch of the repository in the current directory.
async fn current_ref() -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["symbolic-ref", "-q", "HEAD"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let git_ref = String::from_utf8_lossy(&out.stdout).trim().to_string();
            debug!(git_ref = %git_ref, "Using checked-out branch");
            Ok(git_ref)
        }
        Ok(_) => bail!("HEAD is not on a branch; pass --ref"),
        Err(e) => {
            warn!(error = %e, "Could not run git");
            bail!("could not determine the current branch; pass --ref")
        }
    }
}
