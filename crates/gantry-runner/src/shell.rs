//! Shell-based step execution on the host.

use crate::interpolation::InterpolationContext;
use crate::runner::{RunnerConfig, StepCommand};
use async_trait::async_trait;
use gantry_core::ports::{CancelToken, StepExecutor, StepInvocation, StepStatus};
use gantry_core::{Error, Result};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Shell executor for running `run:` steps on the host.
pub struct ShellExecutor {
    config: RunnerConfig,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ShellExecutor {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    async fn execute_command(
        &self,
        invocation: &StepInvocation,
        command: &StepCommand,
        script: &str,
        cancel: &CancelToken,
    ) -> Result<StepStatus> {
        let start = std::time::Instant::now();

        info!(
            job = %invocation.job,
            instance = %invocation.instance,
            step = %invocation.step.name,
            command = %command.display_script(),
            workspace = %command.working_dir.display(),
            "Executing shell command"
        );

        let mut child = Command::new(&self.config.shell)
            .args(&self.config.shell_args)
            .arg(script)
            .current_dir(&command.working_dir)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::StepExecution {
                step: invocation.step.name.clone(),
                message: format!("failed to spawn {}: {}", self.config.shell, e),
            })?;

        let masker = Arc::new(command.interpolation.clone());
        let mut forwarders = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            forwarders.push(forward_lines(out, "stdout", invocation.step.name.clone(), masker.clone()));
        }
        if let Some(err) = child.stderr.take() {
            forwarders.push(forward_lines(err, "stderr", invocation.step.name.clone(), masker));
        }

        let waited = tokio::select! {
            result = child.wait() => Waited::Exited(result),
            _ = sleep_or_forever(self.config.timeout) => Waited::TimedOut,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        if matches!(waited, Waited::Exited(_)) {
            futures::future::join_all(forwarders).await;
        } else {
            let _ = child.kill().await;
            // Grandchildren may still hold the pipes open.
            for forwarder in forwarders {
                forwarder.abort();
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let status = match waited {
            Waited::Exited(result) => {
                let status = result.map_err(|e| Error::StepExecution {
                    step: invocation.step.name.clone(),
                    message: format!("failed to wait for process: {}", e),
                })?;
                let exit_code = status.code().unwrap_or(-1);
                debug!(exit_code, duration_ms, "Command completed");
                if status.success() {
                    StepStatus::Success
                } else {
                    StepStatus::Failure
                }
            }
            Waited::TimedOut => {
                warn!(
                    step = %invocation.step.name,
                    timeout_secs = self.config.timeout.map(|t| t.as_secs()),
                    "Command timed out, killed process"
                );
                StepStatus::Failure
            }
            Waited::Cancelled => {
                info!(step = %invocation.step.name, duration_ms, "Command cancelled, killed process");
                StepStatus::Failure
            }
        };

        Ok(status)
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, invocation: &StepInvocation, cancel: CancelToken) -> Result<StepStatus> {
        let command = StepCommand::resolve(invocation, &self.config)?;

        let Some(script) = command.script.as_deref() else {
            return Err(Error::StepExecution {
                step: invocation.step.name.clone(),
                message: format!(
                    "the shell executor cannot run action '{}'",
                    command.uses.as_deref().unwrap_or_default()
                ),
            });
        };

        if cancel.is_cancelled() {
            debug!(step = %invocation.step.name, "Not starting cancelled step");
            return Ok(StepStatus::Failure);
        }

        self.execute_command(invocation, &command, script, &cancel)
            .await
    }
}

/// Log each output line with secrets masked.
///
/// Lines are decoded lossily; the pipe is drained to EOF regardless of
/// encoding so the child never sees a closed stdout.
fn forward_lines<R>(
    reader: R,
    stream: &'static str,
    step: String,
    masker: Arc<InterpolationContext>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    info!(target: "gantry::output", step = %step, stream, "{}", masker.mask_secrets(line));
                }
                Err(e) => {
                    debug!(step = %step, stream, error = %e, "Output stream closed");
                    break;
                }
            }
        }
    })
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
