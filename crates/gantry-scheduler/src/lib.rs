//! Job graph resolution, matrix expansion and run orchestration for Gantry.
//!
//! An [`ExecutionPlan`] is built once from a pipeline definition; every
//! configuration error surfaces there. The [`Scheduler`] then drives the
//! plan against a [`gantry_core::StepExecutor`] and produces a
//! [`gantry_core::run::RunReport`].

pub mod dag;
pub mod gate;
pub mod matrix;
pub mod outcome;
pub mod plan;
pub mod scheduler;
pub mod triggers;

pub use dag::{GraphError, JobGraph, Readiness};
pub use gate::{ConditionError, ConditionalGate};
pub use matrix::{JobInstance, MatrixError, MatrixExpander};
pub use outcome::OutcomeTable;
pub use plan::{ExecutionPlan, PlanError};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use triggers::TriggerEvaluator;
