//! Outputs command - Re-export outputs from a saved result.

use std::path::PathBuf;

use anyhow::{Context, Result};
use berth_catalog::standard_outputs;
use berth_core::{OutputExporter, ReconciliationResult};
use clap::Args;

use super::{render_outputs, EnvironmentArgs, OutputFormat};

#[derive(Args)]
pub struct OutputsArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    /// Result written by `berth apply`
    #[arg(long, default_value = ".berth/result.json")]
    result: PathBuf,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
}

pub async fn execute(args: OutputsArgs) -> Result<()> {
    let config = args.env.load_config()?;
    let profile = args.env.load_profile()?;
    let result = ReconciliationResult::load(&args.result)
        .with_context(|| format!("Failed to read result {}", args.result.display()))?;

    let outputs = OutputExporter::export(&result, &standard_outputs(&config, &profile))?;
    println!("{}", render_outputs(&outputs, args.format)?);
    Ok(())
}
