//! Step executors for Gantry.
//!
//! Both executors implement [`gantry_core::StepExecutor`]: [`ShellExecutor`]
//! runs `run:` scripts on the host, [`DryRunExecutor`] only resolves them.

pub mod dry_run;
pub mod interpolation;
pub mod runner;
pub mod shell;

pub use dry_run::DryRunExecutor;
pub use interpolation::InterpolationContext;
pub use runner::{RunnerConfig, StepCommand};
pub use shell::ShellExecutor;
