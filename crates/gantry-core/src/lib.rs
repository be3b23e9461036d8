//! Gantry Core
//!
//! Core domain types, traits, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the scheduler, the step runners and the CLI.

pub mod error;
pub mod events;
pub mod glob;
pub mod ids;
pub mod pipeline;
pub mod ports;
pub mod run;
pub mod secrets;

pub use error::{Error, Result};
pub use events::{ActivationContext, Event, EventKind};
pub use glob::Glob;
pub use ids::*;
pub use ports::{CancelToken, StepExecutor, StepInvocation, StepStatus};
pub use run::Outcome;
