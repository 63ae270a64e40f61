//! berth CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Configuration error
//! - 4: Incomplete reconciliation
//! - 130: Interrupted

use std::process::ExitCode;

use berth_catalog::CatalogError;
use berth_core::CoreError;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, RunError};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONFIG_ERROR: u8 = 3;
    pub const INCOMPLETE: u8 = 4;
    pub const INTERRUPTED: u8 = 130;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "berth=debug,info" } else { "berth=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_result = tracing_subscriber::registry()
        .with(cli.json.then(|| fmt::layer().json()))
        .with((!cli.json).then(|| fmt::layer().with_target(false)))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Plan(args) => commands::plan::execute(args).await,
        Commands::Apply(args) => commands::apply::execute(args, cli.quiet).await,
        Commands::Outputs(args) => commands::outputs::execute(args).await,
        Commands::Bootstrap(args) => commands::bootstrap::execute(args, cli.quiet).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Map an error chain to an exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(run) = cause.downcast_ref::<RunError>() {
            return match run {
                RunError::Incomplete { .. } => ExitCodes::INCOMPLETE,
                RunError::Cancelled => ExitCodes::INTERRUPTED,
                RunError::InvalidArgument(_) => ExitCodes::INVALID_ARGS,
            };
        }
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            return match core {
                CoreError::IncompleteOutputs(_) => ExitCodes::INCOMPLETE,
                CoreError::Io(_) | CoreError::Serialization(_) => ExitCodes::GENERAL_ERROR,
                _ => ExitCodes::CONFIG_ERROR,
            };
        }
        if let Some(catalog) = cause.downcast_ref::<CatalogError>() {
            return match catalog {
                CatalogError::MissingOutput(_) | CatalogError::InvalidOutput { .. } => ExitCodes::INVALID_ARGS,
                _ => ExitCodes::CONFIG_ERROR,
            };
        }
    }
    ExitCodes::GENERAL_ERROR
}
