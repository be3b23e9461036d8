//! Gantry CLI entrypoint.

use clap::Parser;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod output;

use commands::{Commands, ConfigCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Run CI job graphs locally", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CliConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable config file");
        CliConfig::default()
    });

    match cli.command {
        Commands::Init { path } => handlers::init(&path).await?,
        Commands::Validate { path } => handlers::validate(&config, path).await?,
        Commands::Plan { target } => handlers::plan(&config, target).await?,
        Commands::Run {
            target,
            dry_run,
            max_workers,
            output,
        } => return handlers::run(&config, target, dry_run, max_workers, output).await,
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// `GANTRY_LOG` filters log output, defaulting to `info`; `-v` forces `debug`.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("GANTRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
