//! CLI command definitions.

use crate::config::OutputFormat;
use clap::{Args, Subcommand};
use gantry_core::events::EventKind;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline
    Init {
        /// Where to write it
        #[arg(default_value = "gantry.yaml")]
        path: PathBuf,
    },

    /// Validate pipeline configuration
    Validate {
        /// Path to pipeline file
        path: Option<PathBuf>,
    },

    /// Show what an event would run, without running anything
    Plan {
        #[command(flatten)]
        target: EventArgs,
    },

    /// Run a pipeline locally
    Run {
        #[command(flatten)]
        target: EventArgs,

        /// Resolve and log steps instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of instances running at once
        #[arg(short = 'j', long)]
        max_workers: Option<usize>,

        /// Report format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Print the JSON schema of the pipeline format
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Which pipeline, and the event it is evaluated for.
#[derive(Args)]
pub struct EventArgs {
    /// Path to pipeline file
    pub path: Option<PathBuf>,

    /// Event kind
    #[arg(short, long, default_value = "push")]
    pub event: EventKind,

    /// Git ref; defaults to the checked-out branch
    #[arg(short = 'r', long = "ref")]
    pub git_ref: Option<String>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
