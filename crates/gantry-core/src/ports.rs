//! Port traits between the scheduling core and step execution.
//!
//! The core treats every step as opaque: it hands an invocation to a
//! [`StepExecutor`] and consumes exactly one terminal [`StepStatus`].

use crate::Result;
use crate::events::ActivationContext;
use crate::ids::RunId;
use crate::pipeline::StepDefinition;
use crate::secrets::SecretValue;
use async_trait::async_trait;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Terminal status reported by a step executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }
}

/// Everything an executor needs to run one step of one job instance.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub run_id: RunId,
    pub job: String,
    /// Display name of the job instance, e.g. `test (os=linux, rust=stable)`.
    pub instance: String,
    pub step_index: usize,
    pub step: StepDefinition,
    /// Matrix assignment of the instance, passed through uninterpreted.
    pub matrix: IndexMap<String, String>,
    /// Pipeline, job and step environment, later entries winning.
    pub env: IndexMap<String, String>,
    /// Only the secrets the step asked for.
    pub secrets: HashMap<String, SecretValue>,
    pub context: ActivationContext,
}

/// Executes opaque steps on behalf of the scheduler.
///
/// Implementations must honour `cancel` cooperatively: once it fires the
/// step should stop early and report whatever status it ends with. The
/// scheduler has already recorded the instance as cancelled by then.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, invocation: &StepInvocation, cancel: CancelToken)
    -> Result<StepStatus>;
}

/// Cooperative cancellation signal shared by the instances of one job.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation has been signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any token clone, so this cannot close
        // while `self` is alive.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.is_cancelled()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!token.is_cancelled());
        token.cancel();

        let observed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(observed);
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already cancelled");
    }
}
