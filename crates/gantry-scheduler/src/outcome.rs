//! Shared outcome table for one run.

use gantry_core::ids::{InstanceKey, JobIndex};
use gantry_core::run::Outcome;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug)]
struct TableState {
    jobs: Vec<Outcome>,
    instances: Vec<Vec<Outcome>>,
}

/// Job and instance outcomes, addressed by index.
///
/// Every write goes through [`Outcome::can_transition_to`], so once an
/// entry is terminal it stays that way no matter who writes later.
#[derive(Debug)]
pub struct OutcomeTable {
    state: RwLock<TableState>,
}

impl OutcomeTable {
    /// One entry per job, each with the given number of instances, all pending.
    pub fn new<I>(instance_counts: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let instances: Vec<Vec<Outcome>> = instance_counts
            .into_iter()
            .map(|count| vec![Outcome::Pending; count])
            .collect();
        Self {
            state: RwLock::new(TableState {
                jobs: vec![Outcome::Pending; instances.len()],
                instances,
            }),
        }
    }

    pub async fn job(&self, job: JobIndex) -> Outcome {
        self.state.read().await.jobs[job.index()]
    }

    /// Copy of all job outcomes, indexed by [`JobIndex`].
    pub async fn jobs(&self) -> Vec<Outcome> {
        self.state.read().await.jobs.clone()
    }

    pub async fn instance(&self, key: InstanceKey) -> Outcome {
        self.state.read().await.instances[key.job.index()][key.instance]
    }

    pub async fn instances(&self, job: JobIndex) -> Vec<Outcome> {
        self.state.read().await.instances[job.index()].clone()
    }

    /// Apply a job transition. Returns `false` when it would break monotonicity.
    pub async fn transition_job(&self, job: JobIndex, next: Outcome) -> bool {
        let mut state = self.state.write().await;
        let current = &mut state.jobs[job.index()];
        if !current.can_transition_to(next) {
            trace!(job = %job, from = %current, to = %next, "Rejected job transition");
            return false;
        }
        *current = next;
        true
    }

    /// Apply an instance transition. Returns `false` when it would break monotonicity.
    pub async fn transition_instance(&self, key: InstanceKey, next: Outcome) -> bool {
        let mut state = self.state.write().await;
        let current = &mut state.instances[key.job.index()][key.instance];
        if !current.can_transition_to(next) {
            trace!(instance = %key, from = %current, to = %next, "Rejected instance transition");
            return false;
        }
        *current = next;
        true
    }

    /// Move every non-terminal instance of a job to `outcome`.
    /// Returns the indices that changed.
    pub async fn settle_open_instances(&self, job: JobIndex, outcome: Outcome) -> Vec<usize> {
        let mut state = self.state.write().await;
        state.instances[job.index()]
            .iter_mut()
            .enumerate()
            .filter(|(_, current)| current.can_transition_to(outcome))
            .map(|(index, current)| {
                *current = outcome;
                index
            })
            .collect()
    }

    /// Aggregate outcome of a job's instances, or `None` while any is open.
    pub async fn settled_outcome(&self, job: JobIndex) -> Option<Outcome> {
        let state = self.state.read().await;
        let instances = &state.instances[job.index()];
        instances
            .iter()
            .all(Outcome::is_terminal)
            .then(|| Outcome::aggregate(instances.iter().copied()))
    }

    pub async fn all_terminal(&self) -> bool {
        let state = self.state.read().await;
        state.jobs.iter().all(Outcome::is_terminal)
            && state.instances.iter().flatten().all(Outcome::is_terminal)
    }
}
