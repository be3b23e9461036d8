//! Trigger matching and evaluation.

use gantry_core::events::{ActivationContext, Event, EventKind};
use gantry_core::glob::Glob;
use gantry_core::pipeline::{PullRequestTrigger, PushTrigger, TriggerConfig};
use tracing::{debug, warn};

/// Decides whether an event activates a pipeline and under which context.
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Activation decision for an event. Pure; `None` means no run.
    pub fn activate(
        &self,
        triggers: Option<&TriggerConfig>,
        event: &Event,
    ) -> Option<ActivationContext> {
        if let Err(e) = event.validate() {
            warn!(event = %event, error = %e, "Ignoring malformed event");
            return None;
        }

        let activated = match triggers {
            Some(config) => self.config_matches(config, event),
            // Default: trigger on push to any branch
            None => event.effective_kind() == EventKind::Push && event.branch().is_some(),
        };

        debug!(event = %event, activated, "Evaluated triggers");
        activated.then(|| ActivationContext::from_event(event))
    }

    /// Check if an event matches the trigger configuration.
    pub fn matches(&self, triggers: Option<&TriggerConfig>, event: &Event) -> bool {
        self.activate(triggers, event).is_some()
    }

    fn config_matches(&self, config: &TriggerConfig, event: &Event) -> bool {
        match event.effective_kind() {
            EventKind::Push => config
                .push
                .as_ref()
                .is_some_and(|push| self.push_branch_matches(push, event)),
            EventKind::TagPush => config
                .push
                .as_ref()
                .is_some_and(|push| self.push_tag_matches(push, event)),
            EventKind::PullRequest => config
                .pull_request
                .as_ref()
                .is_some_and(|pr| self.pull_request_matches(pr, event)),
        }
    }

    fn push_branch_matches(&self, trigger: &PushTrigger, event: &Event) -> bool {
        event
            .branch()
            .is_some_and(|branch| self.branch_matches(&trigger.branches, branch))
    }

    fn push_tag_matches(&self, trigger: &PushTrigger, event: &Event) -> bool {
        event
            .tag()
            .is_some_and(|tag| self.tag_matches(&trigger.tags, tag))
    }

    fn pull_request_matches(&self, trigger: &PullRequestTrigger, event: &Event) -> bool {
        event
            .branch()
            .is_some_and(|target| self.branch_matches(&trigger.branches, target))
    }

    fn branch_matches(&self, patterns: &[Glob], branch: &str) -> bool {
        if patterns.is_empty() {
            return true; // Match all branches if no patterns specified
        }
        Glob::any_matches(patterns, branch)
    }

    fn tag_matches(&self, patterns: &[Glob], tag: &str) -> bool {
        if patterns.is_empty() {
            return false; // Don't match tags unless explicitly specified
        }
        Glob::any_matches(patterns, tag)
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci_triggers() -> TriggerConfig {
        serde_json::from_value(serde_json::json!({
            "push": { "branches": ["master"], "tags": ["v*"] },
            "pull_request": { "branches": ["master"] }
        }))
        .unwrap()
    }

    #[test]
    fn test_push_to_allowed_branch() {
        let evaluator = TriggerEvaluator::new();
        let triggers = ci_triggers();
        let ctx = evaluator
            .activate(Some(&triggers), &Event::push("refs/heads/master"))
            .unwrap();
        assert_eq!(ctx.branch.as_deref(), Some("master"));
        assert_eq!(ctx.kind, EventKind::Push);
    }

    #[test]
    fn test_push_to_other_branch_does_not_activate() {
        let evaluator = TriggerEvaluator::new();
        let triggers = ci_triggers();
        assert!(
            evaluator
                .activate(Some(&triggers), &Event::push("refs/heads/develop"))
                .is_none()
        );
    }

    #[test]
    fn test_tag_push_matches_glob() {
        let evaluator = TriggerEvaluator::new();
        let triggers = ci_triggers();

        let ctx = evaluator
            .activate(Some(&triggers), &Event::push("refs/tags/v1.0.0"))
            .unwrap();
        assert_eq!(ctx.kind, EventKind::TagPush);
        assert_eq!(ctx.tag.as_deref(), Some("v1.0.0"));

        assert!(evaluator.matches(Some(&triggers), &Event::tag_push("v2")));
        assert!(!evaluator.matches(Some(&triggers), &Event::tag_push("release-1")));
    }

    #[test]
    fn test_pull_request_target_branch() {
        let evaluator = TriggerEvaluator::new();
        let triggers = ci_triggers();
        assert!(evaluator.matches(Some(&triggers), &Event::pull_request("master")));
        assert!(!evaluator.matches(Some(&triggers), &Event::pull_request("feature/x")));
    }

    #[test]
    fn test_missing_section_never_matches() {
        let evaluator = TriggerEvaluator::new();
        let push_only: TriggerConfig =
            serde_json::from_value(serde_json::json!({ "push": {} })).unwrap();

        // Empty branch list matches every branch, empty tag list no tag.
        assert!(evaluator.matches(Some(&push_only), &Event::push("anything")));
        assert!(!evaluator.matches(Some(&push_only), &Event::tag_push("v1")));
        assert!(!evaluator.matches(Some(&push_only), &Event::pull_request("master")));
    }

    #[test]
    fn test_no_triggers_defaults_to_branch_push() {
        let evaluator = TriggerEvaluator::new();
        assert!(evaluator.matches(None, &Event::push("refs/heads/feature/y")));
        assert!(!evaluator.matches(None, &Event::push("refs/tags/v1")));
        assert!(!evaluator.matches(None, &Event::pull_request("master")));
    }

    #[test]
    fn test_malformed_event_is_ignored() {
        let evaluator = TriggerEvaluator::new();
        assert!(!evaluator.matches(None, &Event::tag_push("refs/heads/master")));
    }
}
