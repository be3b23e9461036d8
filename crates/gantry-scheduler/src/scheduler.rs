//! Main scheduler orchestration.

use crate::dag::Readiness;
use crate::gate::ConditionalGate;
use crate::matrix::JobInstance;
use crate::outcome::OutcomeTable;
use crate::plan::ExecutionPlan;
use crate::triggers::TriggerEvaluator;

use chrono::Utc;
use gantry_core::events::{ActivationContext, Event};
use gantry_core::ids::{InstanceKey, JobIndex, RunId};
use gantry_core::pipeline::StepDefinition;
use gantry_core::ports::{CancelToken, StepExecutor, StepInvocation, StepStatus};
use gantry_core::run::{InstanceReport, JobReport, Outcome, RunReport, SkipReason, StepReport};
use gantry_core::secrets::SecretStore;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on instances running at once across all jobs.
    pub max_workers: usize,
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

/// Drives an [`ExecutionPlan`] to completion against a [`StepExecutor`].
pub struct Scheduler {
    executor: Arc<dyn StepExecutor>,
    config: SchedulerConfig,
    secrets: Arc<SecretStore>,
    triggers: TriggerEvaluator,
    gate: ConditionalGate,
}

/// What an instance task hands back to the coordinator.
struct InstanceResult {
    key: InstanceKey,
    outcome: Outcome,
    steps: Vec<StepReport>,
    duration_ms: Option<u64>,
}

/// Per-instance bookkeeping kept by the coordinator.
#[derive(Default)]
struct InstanceRecord {
    steps: Vec<StepReport>,
    duration_ms: Option<u64>,
}

/// Everything a spawned instance task owns.
struct InstanceTask {
    run_id: RunId,
    key: InstanceKey,
    job: String,
    instance: JobInstance,
    steps: Vec<StepDefinition>,
    env: IndexMap<String, String>,
    context: ActivationContext,
    executor: Arc<dyn StepExecutor>,
    secrets: Arc<SecretStore>,
    table: Arc<OutcomeTable>,
    cancel: CancelToken,
    fail_fast: bool,
    workers: Arc<Semaphore>,
    job_slots: Option<Arc<Semaphore>>,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            executor,
            config: SchedulerConfig::default(),
            secrets: Arc::new(SecretStore::new()),
            triggers: TriggerEvaluator::new(),
            gate: ConditionalGate::new(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretStore) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Activate the plan for an event and run it. `None` when not activated.
    pub async fn handle_event(&self, plan: &ExecutionPlan, event: &Event) -> Option<RunReport> {
        let Some(context) = self
            .triggers
            .activate(plan.definition().triggers.as_ref(), event)
        else {
            info!(pipeline = %plan.name(), event = %event, "Event did not activate pipeline");
            return None;
        };
        Some(self.run(plan, context).await)
    }

    /// Run every job of the plan under the given context.
    ///
    /// Returns once every job and instance has a terminal outcome.
    pub async fn run(&self, plan: &ExecutionPlan, context: ActivationContext) -> RunReport {
        let run_id = RunId::new();
        let span = info_span!("run", run_id = %run_id, pipeline = %plan.name());
        self.drive(plan, context, run_id).instrument(span).await
    }

    async fn drive(
        &self,
        plan: &ExecutionPlan,
        context: ActivationContext,
        run_id: RunId,
    ) -> RunReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let graph = plan.graph();

        info!(
            git_ref = %context.git_ref,
            kind = %context.kind,
            jobs = graph.len(),
            instances = plan.total_instances(),
            "Starting run"
        );

        let table = Arc::new(OutcomeTable::new(
            graph.jobs().map(|node| plan.instances(node.index).len()),
        ));
        let workers = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let cancel_tokens: Vec<CancelToken> = graph.jobs().map(|_| CancelToken::new()).collect();
        let mut skip_reasons: Vec<Option<SkipReason>> = vec![None; graph.len()];
        let mut records: Vec<Vec<InstanceRecord>> = graph
            .jobs()
            .map(|node| {
                plan.instances(node.index)
                    .iter()
                    .map(|_| InstanceRecord::default())
                    .collect()
            })
            .collect();

        let mut join_set = JoinSet::new();
        let mut tasks: HashMap<tokio::task::Id, InstanceKey> = HashMap::new();

        loop {
            // Re-evaluate the frontier in topological order so that skips
            // cascade through the graph in a single pass.
            let mut snapshot = table.jobs().await;
            for &index in graph.topological_order() {
                if snapshot[index.index()] != Outcome::Pending {
                    continue;
                }
                let job = plan.job(index);

                match graph.readiness(index, &snapshot) {
                    Readiness::Waiting => continue,
                    Readiness::Blocked(dep) => {
                        let reason = SkipReason::Upstream {
                            job: graph.job(dep).name.clone(),
                            outcome: snapshot[dep.index()],
                        };
                        info!(job = %job.name, reason = %reason, "Skipping job");
                        self.skip_job(&table, index, reason, &mut skip_reasons).await;
                        snapshot[index.index()] = Outcome::Skipped;
                    }
                    Readiness::Ready if !self.gate.allowed(job, &context) => {
                        info!(job = %job.name, "Skipping job, condition unmet");
                        self.skip_job(&table, index, SkipReason::ConditionUnmet, &mut skip_reasons)
                            .await;
                        snapshot[index.index()] = Outcome::Skipped;
                    }
                    Readiness::Ready => {
                        table.transition_job(index, Outcome::Running).await;
                        snapshot[index.index()] = Outcome::Running;

                        let job_slots = job
                            .matrix
                            .as_ref()
                            .and_then(|m| m.max_parallel)
                            .map(|n| Arc::new(Semaphore::new(n as usize)));
                        let mut env = plan.definition().env.clone();
                        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));

                        info!(
                            job = %job.name,
                            instances = plan.instances(index).len(),
                            "Job ready"
                        );

                        for instance in plan.instances(index) {
                            let key = InstanceKey::new(index, instance.index);
                            let task = InstanceTask {
                                run_id,
                                key,
                                job: job.name.clone(),
                                instance: instance.clone(),
                                steps: job.steps.clone(),
                                env: env.clone(),
                                context: context.clone(),
                                executor: self.executor.clone(),
                                secrets: self.secrets.clone(),
                                table: table.clone(),
                                cancel: cancel_tokens[index.index()].clone(),
                                fail_fast: job.fail_fast(),
                                workers: workers.clone(),
                                job_slots: job_slots.clone(),
                            };
                            let span = info_span!(
                                "instance",
                                job = %job.name,
                                instance = %instance.name,
                                key = %key
                            );
                            let handle = join_set.spawn(run_instance(task).instrument(span));
                            tasks.insert(handle.id(), key);
                        }
                    }
                }
            }

            if join_set.is_empty() {
                break;
            }

            let result = match join_set.join_next_with_id().await {
                Some(Ok((id, result))) => {
                    tasks.remove(&id);
                    result
                }
                Some(Err(join_error)) => {
                    let Some(key) = tasks.remove(&join_error.id()) else {
                        error!(error = %join_error, "Lost track of a failed instance task");
                        continue;
                    };
                    error!(instance = %key, error = %join_error, "Instance task failed");
                    InstanceResult {
                        key,
                        outcome: Outcome::Failure,
                        steps: Vec::new(),
                        duration_ms: None,
                    }
                }
                None => break,
            };

            self.complete_instance(plan, &table, &cancel_tokens, &mut records, result)
                .await;
        }

        let jobs: Vec<JobReport> = {
            let job_outcomes = table.jobs().await;
            let mut jobs = Vec::with_capacity(graph.len());
            for (node, job_records) in graph.jobs().zip(records) {
                let instance_outcomes = table.instances(node.index).await;
                let instances = plan
                    .instances(node.index)
                    .iter()
                    .zip(job_records)
                    .zip(instance_outcomes)
                    .map(|((instance, record), outcome)| InstanceReport {
                        index: instance.index,
                        name: instance.name.clone(),
                        matrix: instance.matrix.clone(),
                        outcome,
                        steps: record.steps,
                        duration_ms: record.duration_ms,
                    })
                    .collect();
                jobs.push(JobReport {
                    name: node.name.clone(),
                    outcome: job_outcomes[node.index.index()],
                    skip_reason: skip_reasons[node.index.index()].take(),
                    instances,
                });
            }
            jobs
        };

        let outcome = RunReport::overall(&jobs);
        let completed_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(outcome = %outcome, duration_ms, "Run finished");

        RunReport {
            run_id,
            pipeline: plan.name().to_string(),
            context,
            outcome,
            jobs,
            started_at,
            completed_at,
            duration_ms,
        }
    }

    async fn skip_job(
        &self,
        table: &OutcomeTable,
        index: JobIndex,
        reason: SkipReason,
        skip_reasons: &mut [Option<SkipReason>],
    ) {
        table.settle_open_instances(index, Outcome::Skipped).await;
        table.transition_job(index, Outcome::Skipped).await;
        skip_reasons[index.index()] = Some(reason);
    }

    /// Record an instance completion, apply fail-fast and settle the job.
    async fn complete_instance(
        &self,
        plan: &ExecutionPlan,
        table: &OutcomeTable,
        cancel_tokens: &[CancelToken],
        records: &mut [Vec<InstanceRecord>],
        result: InstanceResult,
    ) {
        let InstanceResult {
            key,
            outcome,
            steps,
            duration_ms,
        } = result;
        let job = plan.job(key.job);

        let record = &mut records[key.job.index()][key.instance];
        record.steps = steps;
        record.duration_ms = duration_ms;

        // Tasks record their own outcome; this only lands for a task that panicked.
        let cancel = &cancel_tokens[key.job.index()];
        if !settle_instance(table, key, outcome, job.fail_fast(), cancel).await {
            let recorded = table.instance(key).await;
            if recorded != outcome {
                debug!(
                    job = %job.name,
                    instance = %key,
                    reported = %outcome,
                    recorded = %recorded,
                    "Ignoring late instance completion"
                );
            }
        }

        if table.job(key.job).await != Outcome::Running {
            return;
        }
        if let Some(job_outcome) = table.settled_outcome(key.job).await {
            table.transition_job(key.job, job_outcome).await;
            info!(job = %job.name, outcome = %job_outcome, "Job finished");
        }
    }
}

/// Run one instance: wait for capacity, then its steps in order, stopping
/// at the first failure or on cancellation.
async fn run_instance(task: InstanceTask) -> InstanceResult {
    let cancelled = |key| InstanceResult {
        key,
        outcome: Outcome::Cancelled,
        steps: Vec::new(),
        duration_ms: None,
    };

    let _job_permit = match &task.job_slots {
        Some(slots) => match acquire(slots, &task.cancel).await {
            Some(permit) => Some(permit),
            None => return cancelled(task.key),
        },
        None => None,
    };
    let Some(_worker_permit) = acquire(&task.workers, &task.cancel).await else {
        return cancelled(task.key);
    };

    if !task.table.transition_instance(task.key, Outcome::Running).await {
        return cancelled(task.key);
    }

    debug!("Instance started");
    let start = Instant::now();
    let matrix = task.instance.matrix_strings();
    let mut outcome = Outcome::Success;
    let mut reports = Vec::with_capacity(task.steps.len());

    for (step_index, step) in task.steps.iter().enumerate() {
        if task.cancel.is_cancelled() {
            outcome = Outcome::Cancelled;
            break;
        }

        let mut env = task.env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let invocation = StepInvocation {
            run_id: task.run_id,
            job: task.job.clone(),
            instance: task.instance.name.clone(),
            step_index,
            step: step.clone(),
            matrix: matrix.clone(),
            env,
            secrets: task.secrets.select(&step.secrets),
            context: task.context.clone(),
        };

        let step_start = Instant::now();
        let status = match task.executor.execute(&invocation, task.cancel.clone()).await {
            Ok(status) => status,
            Err(e) => {
                error!(step = %step.name, error = %e, "Step could not be executed");
                StepStatus::Failure
            }
        };
        let duration_ms = step_start.elapsed().as_millis() as u64;
        debug!(step = %step.name, status = ?status, duration_ms, "Step finished");

        reports.push(StepReport {
            name: step.name.clone(),
            status,
            duration_ms,
        });

        if !status.is_success() {
            outcome = Outcome::Failure;
            break;
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    debug!(outcome = %outcome, duration_ms, "Instance finished");

    // Settle while the permits are still held, so no queued sibling can start
    // between this failure and the fail-fast cancellation.
    settle_instance(&task.table, task.key, outcome, task.fail_fast, &task.cancel).await;

    InstanceResult {
        key: task.key,
        outcome,
        steps: reports,
        duration_ms: Some(duration_ms),
    }
}

/// Record an instance's terminal outcome. A failure under fail-fast also
/// cancels every open sibling. Returns `false` when the instance was already
/// terminal.
async fn settle_instance(
    table: &OutcomeTable,
    key: InstanceKey,
    outcome: Outcome,
    fail_fast: bool,
    cancel: &CancelToken,
) -> bool {
    if !table.transition_instance(key, outcome).await {
        return false;
    }
    if outcome == Outcome::Failure && fail_fast {
        let cancelled = table.settle_open_instances(key.job, Outcome::Cancelled).await;
        cancel.cancel();
        if !cancelled.is_empty() {
            warn!(
                failed = %key,
                cancelled = cancelled.len(),
                "Fail-fast cancelled sibling instances"
            );
        }
    }
    true
}

/// Acquire a permit unless the job is cancelled first.
async fn acquire(semaphore: &Arc<Semaphore>, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        permit = semaphore.clone().acquire_owned() => permit.ok(),
        _ = cancel.cancelled() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::new().with_max_workers(0);
        assert_eq!(config.max_workers, 1);

        let config = SchedulerConfig::default().with_max_workers(8);
        assert_eq!(config.max_workers, 8);
        assert!(SchedulerConfig::default().max_workers >= 1);
    }
}
