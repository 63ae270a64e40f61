//! Plan command - Show the catalog without touching the provider.

use anyhow::{Context, Result};
use berth_catalog::container_environment;
use clap::Args;
use serde_json::json;
use tracing::info;

use super::EnvironmentArgs;

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    /// Print the catalog as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: PlanArgs) -> Result<()> {
    let config = args.env.load_config()?;
    let profile = args.env.load_profile()?;
    let catalog = container_environment(&config, &profile).context("Failed to build environment catalog")?;
    info!("Planning {} ({} resources)", catalog.name(), catalog.len());

    if args.json {
        let specs: Vec<_> = catalog.ordered_specs().collect();
        let document = json!({
            "catalog": catalog.name(),
            "profile": profile,
            "resources": specs,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("📋 {} ({} network, {} resources)", catalog.name(), profile.network_mode, catalog.len());
    for (step, spec) in catalog.ordered_specs().enumerate() {
        let mode = if spec.is_external() { "discover" } else { "ensure" };
        println!("{:>3}. {:<8} {:<16} {}", step + 1, mode, spec.kind.as_str(), spec.logical_name);
        if !spec.depends_on.is_empty() {
            println!("       after: {}", spec.depends_on.join(", "));
        }
        for strategy in &spec.strategies {
            println!("       match: {}", strategy.label);
        }
        if let Some(readiness) = &spec.readiness {
            println!("       ready: {} in [{}]", readiness.field, readiness.ready.join(", "));
        }
    }
    Ok(())
}
