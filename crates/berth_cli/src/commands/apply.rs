//! Apply command - Reconcile the container environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use berth_catalog::{container_environment, standard_outputs};
use berth_core::{OutputExporter, Reconciler};
use clap::Args;
use tracing::{info, warn};

use super::{cancel_on_ctrl_c, report, write_outputs, EnvironmentArgs, StateArgs};

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    #[command(flatten)]
    state: StateArgs,

    /// Where to write the output map
    #[arg(long, default_value = ".berth/outputs.json", env = "BERTH_OUTPUTS")]
    outputs: PathBuf,

    /// Where to write the full reconciliation result
    #[arg(long, default_value = ".berth/result.json")]
    result: PathBuf,
}

pub async fn execute(args: ApplyArgs, quiet: bool) -> Result<()> {
    let config = args.env.load_config()?;
    let profile = args.env.load_profile()?;
    let catalog = container_environment(&config, &profile).context("Failed to build environment catalog")?;

    let cloud = Arc::new(args.state.open(&config.region)?);
    info!(
        "Applying {} ({} resources, concurrency {})",
        catalog.name(),
        catalog.len(),
        config.max_concurrency
    );

    let reconciler = Reconciler::new(cloud.clone())
        .with_settings(config.reconciler_settings())
        .with_cancel(cancel_on_ctrl_c());
    let result = reconciler.reconcile(&catalog).await;

    args.state.save(&cloud)?;
    result
        .save(&args.result)
        .with_context(|| format!("Failed to write result {}", args.result.display()))?;

    match OutputExporter::export(&result, &standard_outputs(&config, &profile)) {
        Ok(outputs) => {
            write_outputs(&args.outputs, &outputs)?;
            if !quiet {
                println!("📤 {} outputs written to {}", outputs.len(), args.outputs.display());
            }
        }
        Err(e) => warn!("Outputs not written: {}", e),
    }

    report(&result, quiet)
}
