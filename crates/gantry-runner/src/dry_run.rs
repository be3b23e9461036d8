//! Executor that resolves steps without running them.

use crate::runner::{RunnerConfig, StepCommand};
use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::ports::{CancelToken, StepExecutor, StepInvocation, StepStatus};
use tracing::info;

/// Logs what each step would run and reports success.
///
/// Interpolation still happens, so broken expressions or empty steps show
/// up the same way they would in a real run.
#[derive(Default)]
pub struct DryRunExecutor {
    config: RunnerConfig,
}

impl DryRunExecutor {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StepExecutor for DryRunExecutor {
    async fn execute(&self, invocation: &StepInvocation, _cancel: CancelToken) -> Result<StepStatus> {
        let command = StepCommand::resolve(invocation, &self.config)?;
        info!(
            instance = %invocation.instance,
            step = %invocation.step.name,
            command = %command.display_script(),
            dir = %command.working_dir.display(),
            "Would run"
        );
        Ok(StepStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::events::{ActivationContext, Event};
    use gantry_core::ids::RunId;
    use gantry_core::pipeline::StepDefinition;
    use indexmap::IndexMap;
    use std::collections::HashMap;

    fn invocation(step: StepDefinition) -> StepInvocation {
        StepInvocation {
            run_id: RunId::new(),
            job: "publish".to_string(),
            instance: "publish".to_string(),
            step_index: 0,
            step,
            matrix: IndexMap::new(),
            env: IndexMap::new(),
            secrets: HashMap::new(),
            context: ActivationContext::from_event(&Event::tag_push("v1.0.0")),
        }
    }

    #[tokio::test]
    async fn test_dry_run_reports_success() {
        let executor = DryRunExecutor::default();
        let status = executor
            .execute(
                &invocation(StepDefinition::run("publish", "exit 1")),
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(status, StepStatus::Success);
    }

    #[tokio::test]
    async fn test_dry_run_rejects_empty_step() {
        let mut step = StepDefinition::run("empty", "");
        step.run = None;
        let result = DryRunExecutor::default()
            .execute(&invocation(step), CancelToken::new())
            .await;
        assert!(matches!(result, Err(gantry_core::Error::EmptyStep { .. })));
    }
}
