//! Outcomes and the run report.

use crate::events::ActivationContext;
use crate::ids::RunId;
use crate::ports::StepStatus;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job or job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::Failure | Outcome::Skipped | Outcome::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Whether moving from `self` to `next` respects monotonicity:
    /// terminal outcomes are final and `running` never returns to `pending`.
    pub fn can_transition_to(&self, next: Outcome) -> bool {
        match self {
            _ if self.is_terminal() => false,
            Outcome::Running => next != Outcome::Pending && next != Outcome::Running,
            Outcome::Pending => next != Outcome::Pending,
            _ => false,
        }
    }

    /// Aggregate instance outcomes into a job outcome.
    ///
    /// `failure` wins over everything, including cancelled siblings.
    /// An empty set counts as skipped.
    pub fn aggregate<I>(outcomes: I) -> Outcome
    where
        I: IntoIterator<Item = Outcome>,
    {
        let mut seen_any = false;
        let mut all_success = true;
        let mut any_cancelled = false;
        let mut any_open = false;

        for outcome in outcomes {
            seen_any = true;
            match outcome {
                Outcome::Failure => return Outcome::Failure,
                Outcome::Success => {}
                Outcome::Cancelled => {
                    all_success = false;
                    any_cancelled = true;
                }
                Outcome::Skipped => all_success = false,
                Outcome::Pending | Outcome::Running => {
                    all_success = false;
                    any_open = true;
                }
            }
        }

        if !seen_any {
            Outcome::Skipped
        } else if any_open {
            Outcome::Running
        } else if all_success {
            Outcome::Success
        } else if any_cancelled {
            Outcome::Cancelled
        } else {
            Outcome::Skipped
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Pending => "pending",
            Outcome::Running => "running",
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a job never ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency ended in something other than success.
    Upstream { job: String, outcome: Outcome },
    /// The job's run condition evaluated to false.
    ConditionUnmet,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Upstream { job, outcome } => write!(f, "needs '{}' ({})", job, outcome),
            SkipReason::ConditionUnmet => f.write_str("condition unmet"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InstanceReport {
    pub index: usize,
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub matrix: IndexMap<String, serde_json::Value>,
    pub outcome: Outcome,
    #[serde(default)]
    pub steps: Vec<StepReport>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub name: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub instances: Vec<InstanceReport>,
}

impl JobReport {
    pub fn instance_outcomes(&self) -> Vec<Outcome> {
        self.instances.iter().map(|i| i.outcome).collect()
    }
}

/// The sole externally consumed output of a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub context: ActivationContext,
    pub outcome: Outcome,
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn outcome_of(&self, name: &str) -> Option<Outcome> {
        self.job(name).map(|j| j.outcome)
    }

    /// Mapping from job name to its terminal outcome, in declaration order.
    pub fn outcomes(&self) -> IndexMap<String, Outcome> {
        self.jobs
            .iter()
            .map(|j| (j.name.clone(), j.outcome))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Overall outcome: failure if any job failed, success otherwise.
    pub fn overall<'a, I>(jobs: I) -> Outcome
    where
        I: IntoIterator<Item = &'a JobReport>,
    {
        if jobs.into_iter().any(|j| j.outcome == Outcome::Failure) {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_outcomes_are_final() {
        for terminal in [
            Outcome::Success,
            Outcome::Failure,
            Outcome::Skipped,
            Outcome::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [Outcome::Pending, Outcome::Running, Outcome::Success, Outcome::Failure] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(Outcome::Pending.can_transition_to(Outcome::Running));
        assert!(Outcome::Pending.can_transition_to(Outcome::Cancelled));
        assert!(Outcome::Running.can_transition_to(Outcome::Success));
        assert!(!Outcome::Running.can_transition_to(Outcome::Pending));
        assert!(!Outcome::Pending.can_transition_to(Outcome::Pending));
    }

    #[test]
    fn test_aggregate_failure_wins_over_cancelled() {
        let agg = Outcome::aggregate([Outcome::Failure, Outcome::Cancelled, Outcome::Cancelled]);
        assert_eq!(agg, Outcome::Failure);
    }

    #[test]
    fn test_aggregate_success_requires_all() {
        assert_eq!(
            Outcome::aggregate([Outcome::Success, Outcome::Success]),
            Outcome::Success
        );
        assert_eq!(
            Outcome::aggregate([Outcome::Success, Outcome::Running]),
            Outcome::Running
        );
        assert_eq!(Outcome::aggregate([]), Outcome::Skipped);
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::Upstream {
            job: "lint".to_string(),
            outcome: Outcome::Failure,
        };
        assert_eq!(reason.to_string(), "needs 'lint' (failure)");
    }
}
