//! Run conditions evaluated once a job's dependencies have succeeded.

use gantry_core::events::ActivationContext;
use gantry_core::pipeline::{Condition, JobDefinition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Job '{job}' has an empty '{operator}' condition")]
    EmptyComposite { job: String, operator: &'static str },
}

/// Decides whether a ready job may run in the given activation context.
pub struct ConditionalGate;

impl ConditionalGate {
    pub fn new() -> Self {
        Self
    }

    /// A job without a condition is always allowed.
    pub fn allowed(&self, job: &JobDefinition, ctx: &ActivationContext) -> bool {
        job.condition
            .as_ref()
            .is_none_or(|condition| self.evaluate(condition, ctx))
    }

    pub fn evaluate(&self, condition: &Condition, ctx: &ActivationContext) -> bool {
        match condition {
            Condition::Always => true,
            Condition::Event(kind) => ctx.kind == *kind,
            Condition::Branch(glob) => ctx.branch.as_deref().is_some_and(|b| glob.matches(b)),
            Condition::Tag(glob) => ctx.tag.as_deref().is_some_and(|t| glob.matches(t)),
            Condition::Ref(glob) => glob.matches(&ctx.git_ref) || glob.matches(ctx.short_ref()),
            Condition::All(parts) => parts.iter().all(|c| self.evaluate(c, ctx)),
            Condition::Any(parts) => parts.iter().any(|c| self.evaluate(c, ctx)),
            Condition::Not(inner) => !self.evaluate(inner, ctx),
        }
    }

    /// Reject conditions that can never be meaningful.
    pub fn validate(&self, job: &JobDefinition) -> Result<(), ConditionError> {
        match &job.condition {
            Some(condition) => self.validate_condition(&job.name, condition),
            None => Ok(()),
        }
    }

    fn validate_condition(&self, job: &str, condition: &Condition) -> Result<(), ConditionError> {
        let (operator, parts) = match condition {
            Condition::All(parts) => ("all", parts),
            Condition::Any(parts) => ("any", parts),
            Condition::Not(inner) => return self.validate_condition(job, inner),
            _ => return Ok(()),
        };

        if parts.is_empty() {
            return Err(ConditionError::EmptyComposite {
                job: job.to_string(),
                operator,
            });
        }
        parts
            .iter()
            .try_for_each(|part| self.validate_condition(job, part))
    }
}

impl Default for ConditionalGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::events::{Event, EventKind};
    use gantry_core::glob::Glob;

    fn ctx(event: Event) -> ActivationContext {
        ActivationContext::from_event(&event)
    }

    fn glob(pattern: &str) -> Glob {
        Glob::new(pattern).unwrap()
    }

    #[test]
    fn test_no_condition_is_allowed() {
        let gate = ConditionalGate::new();
        assert!(gate.allowed(&JobDefinition::new("lint"), &ctx(Event::push("master"))));
    }

    #[test]
    fn test_ref_condition_matches_short_or_full_ref() {
        let gate = ConditionalGate::new();
        let job = JobDefinition::new("publish").with_condition(Condition::Ref(glob("v*")));

        assert!(!gate.allowed(&job, &ctx(Event::push("refs/heads/master"))));
        assert!(gate.allowed(&job, &ctx(Event::push("refs/tags/v1.0.0"))));

        let full = JobDefinition::new("publish").with_condition(Condition::Ref(glob("refs/tags/v*")));
        assert!(gate.allowed(&full, &ctx(Event::tag_push("v1.0.0"))));
    }

    #[test]
    fn test_tag_and_branch_require_the_field() {
        let gate = ConditionalGate::new();
        let tag = Condition::Tag(glob("*"));
        let branch = Condition::Branch(glob("*"));

        let on_branch = ctx(Event::push("refs/heads/master"));
        let on_tag = ctx(Event::push("refs/tags/v1"));

        assert!(!gate.evaluate(&tag, &on_branch));
        assert!(gate.evaluate(&tag, &on_tag));
        assert!(gate.evaluate(&branch, &on_branch));
        assert!(!gate.evaluate(&branch, &on_tag));
    }

    #[test]
    fn test_composite_conditions() {
        let gate = ConditionalGate::new();
        let release = Condition::All(vec![
            Condition::Event(EventKind::TagPush),
            Condition::Not(Box::new(Condition::Tag(glob("*-rc*")))),
        ]);

        assert!(gate.evaluate(&release, &ctx(Event::tag_push("v1.2.0"))));
        assert!(!gate.evaluate(&release, &ctx(Event::tag_push("v1.2.0-rc1"))));
        assert!(!gate.evaluate(&release, &ctx(Event::push("master"))));

        let either = Condition::Any(vec![
            Condition::Branch(glob("release/**")),
            Condition::Event(EventKind::PullRequest),
        ]);
        assert!(gate.evaluate(&either, &ctx(Event::push("release/2024/q1"))));
        assert!(gate.evaluate(&either, &ctx(Event::pull_request("master"))));
        assert!(!gate.evaluate(&either, &ctx(Event::push("master"))));
        assert!(gate.evaluate(&Condition::Always, &ctx(Event::push("master"))));
    }

    #[test]
    fn test_empty_composites_rejected() {
        let gate = ConditionalGate::new();

        let job = JobDefinition::new("x").with_condition(Condition::Any(vec![]));
        assert!(matches!(
            gate.validate(&job),
            Err(ConditionError::EmptyComposite { operator: "any", .. })
        ));

        let nested = JobDefinition::new("x").with_condition(Condition::Not(Box::new(
            Condition::All(vec![Condition::Always, Condition::All(vec![])]),
        )));
        assert!(gate.validate(&nested).is_err());

        let fine = JobDefinition::new("x").with_condition(Condition::Always);
        assert!(gate.validate(&fine).is_ok());
    }
}
