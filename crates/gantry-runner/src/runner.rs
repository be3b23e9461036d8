//! Runner configuration and the command a step resolves to.

use crate::interpolation::InterpolationContext;
use gantry_core::ports::StepInvocation;
use gantry_core::{Error, Result};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for step execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Program used to run `run:` scripts.
    pub shell: String,
    /// Arguments placed before the script, e.g. `-c`.
    pub shell_args: Vec<String>,
    /// Directory steps run in; `working_directory` is resolved against it.
    pub workspace: PathBuf,
    /// Per-step limit. A step that exceeds it is killed and fails.
    pub timeout: Option<Duration>,
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_shell_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            shell_args: vec!["-c".to_string()],
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
        }
    }
}

/// A step invocation resolved against a runner configuration.
#[derive(Debug, Clone)]
pub struct StepCommand {
    /// Interpolated script, or `None` for `uses:` steps.
    pub script: Option<String>,
    pub uses: Option<String>,
    pub working_dir: PathBuf,
    /// Environment handed to the process, secrets included.
    pub env: IndexMap<String, String>,
    pub interpolation: InterpolationContext,
}

impl StepCommand {
    pub fn resolve(invocation: &StepInvocation, config: &RunnerConfig) -> Result<Self> {
        let step = &invocation.step;
        if step.run.is_none() && step.uses.is_none() {
            return Err(Error::EmptyStep {
                step: step.name.clone(),
            });
        }

        let interpolation = InterpolationContext::from_invocation(invocation);
        let script = step.run.as_deref().map(|s| interpolation.interpolate(s));

        let working_dir = match &step.working_directory {
            Some(dir) => config.workspace.join(interpolation.interpolate(dir)),
            None => config.workspace.clone(),
        };

        let mut env: IndexMap<String, String> = invocation
            .env
            .iter()
            .map(|(k, v)| (k.clone(), interpolation.interpolate(v)))
            .collect();

        let ctx = &invocation.context;
        env.insert("CI".to_string(), "true".to_string());
        env.insert("GANTRY".to_string(), "true".to_string());
        env.insert("GANTRY_RUN_ID".to_string(), invocation.run_id.to_string());
        env.insert("GANTRY_JOB".to_string(), invocation.job.clone());
        env.insert("GANTRY_INSTANCE".to_string(), invocation.instance.clone());
        env.insert("GANTRY_STEP".to_string(), step.name.clone());
        env.insert("GANTRY_EVENT".to_string(), ctx.kind.to_string());
        env.insert("GANTRY_REF".to_string(), ctx.git_ref.clone());
        if let Some(branch) = &ctx.branch {
            env.insert("GANTRY_BRANCH".to_string(), branch.clone());
        }
        if let Some(tag) = &ctx.tag {
            env.insert("GANTRY_TAG".to_string(), tag.clone());
        }
        for (axis, value) in &invocation.matrix {
            env.insert(matrix_env_name(axis), value.clone());
        }
        for (name, value) in &invocation.secrets {
            env.insert(name.clone(), value.expose().to_string());
        }

        Ok(Self {
            script,
            uses: step.uses.clone(),
            working_dir,
            env,
            interpolation,
        })
    }

    /// The script with secrets masked, safe to log.
    pub fn display_script(&self) -> String {
        let shown = self
            .script
            .as_deref()
            .or(self.uses.as_deref())
            .unwrap_or_default();
        self.interpolation.mask_secrets(shown)
    }
}

/// `GANTRY_MATRIX_<AXIS>`, with the axis upper-cased and non-alphanumerics as `_`.
pub fn matrix_env_name(axis: &str) -> String {
    let axis: String = axis
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("GANTRY_MATRIX_{}", axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::events::{ActivationContext, Event};
    use gantry_core::ids::RunId;
    use gantry_core::pipeline::StepDefinition;
    use gantry_core::secrets::SecretValue;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn invocation(step: StepDefinition) -> StepInvocation {
        StepInvocation {
            run_id: RunId::new(),
            job: "test".to_string(),
            instance: "test (rust-version=stable)".to_string(),
            step_index: 0,
            step,
            matrix: IndexMap::from([("rust-version".to_string(), "stable".to_string())]),
            env: IndexMap::from([("TOOLCHAIN".to_string(), "${{ matrix.rust-version }}".to_string())]),
            secrets: HashMap::from([("TOKEN".to_string(), SecretValue::new("hunter2"))]),
            context: ActivationContext::from_event(&Event::push("refs/heads/master")),
        }
    }

    #[test]
    fn test_resolve_builds_environment() {
        let mut step = StepDefinition::run("publish", "publish --token ${{ secrets.TOKEN }}");
        step.working_directory = Some("crates/${{ matrix.rust-version }}".to_string());
        let config = RunnerConfig::new().with_workspace("/work");

        let command = StepCommand::resolve(&invocation(step), &config).unwrap();

        assert_eq!(command.script.as_deref(), Some("publish --token hunter2"));
        assert_eq!(command.display_script(), "publish --token ***");
        assert_eq!(command.working_dir, PathBuf::from("/work/crates/stable"));
        assert_eq!(command.env["TOOLCHAIN"], "stable");
        assert_eq!(command.env["GANTRY_MATRIX_RUST_VERSION"], "stable");
        assert_eq!(command.env["GANTRY_BRANCH"], "master");
        assert_eq!(command.env["TOKEN"], "hunter2");
        assert!(!command.env.contains_key("GANTRY_TAG"));
    }

    #[test]
    fn test_resolve_rejects_empty_step() {
        let mut step = StepDefinition::run("nothing", "");
        step.run = None;
        let err = StepCommand::resolve(&invocation(step), &RunnerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyStep { .. }));
    }

    #[test]
    fn test_config_builder() {
        let config = RunnerConfig::new()
            .with_shell("bash")
            .with_shell_args(["-eo", "pipefail", "-c"])
            .with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(config.shell, "bash");
        assert_eq!(config.shell_args.len(), 3);
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
    }
}
