//! Bootstrap command - Launch a build server into an applied environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use berth_catalog::{build_server_catalog, build_server_outputs, BuildServerSettings};
use berth_core::{OutputExporter, Reconciler};
use clap::Args;
use tracing::info;

use super::{cancel_on_ctrl_c, read_outputs, report, EnvironmentArgs, StateArgs};

#[derive(Args)]
pub struct BootstrapArgs {
    #[command(flatten)]
    env: EnvironmentArgs,

    #[command(flatten)]
    state: StateArgs,

    /// Output map written by `berth apply`
    #[arg(long, default_value = ".berth/outputs.json", env = "BERTH_OUTPUTS")]
    outputs: PathBuf,

    /// `Name` tag of the instance
    #[arg(long, default_value = "build-server")]
    name: String,

    /// Key pair to discover or create
    #[arg(long, default_value = "build-server-key")]
    key_name: String,

    #[arg(long, default_value = "t3.micro")]
    instance_type: String,

    /// Machine image id
    #[arg(long)]
    image: Option<String>,
}

pub async fn execute(args: BootstrapArgs, quiet: bool) -> Result<()> {
    let config = args.env.load_config()?;
    let outputs = read_outputs(&args.outputs)?;

    let mut settings = BuildServerSettings {
        instance_name: args.name.clone(),
        key_name: args.key_name.clone(),
        instance_type: args.instance_type.clone(),
        ..Default::default()
    };
    if let Some(image) = &args.image {
        settings.image_id = image.clone();
    }
    let catalog = build_server_catalog(&outputs, &settings).context("Failed to build bootstrap catalog")?;

    let cloud = Arc::new(args.state.open(&config.region)?);
    info!("Bootstrapping {} into {}", settings.instance_name, config.region);

    let result = Reconciler::new(cloud.clone())
        .with_settings(config.reconciler_settings())
        .with_cancel(cancel_on_ctrl_c())
        .reconcile(&catalog)
        .await;
    args.state.save(&cloud)?;

    if let Ok(server) = OutputExporter::export(&result, &build_server_outputs()) {
        let id = server["instance_id"].as_str().unwrap_or_default();
        let ip = server["public_ip"].as_str().unwrap_or_default();
        println!("🖥️  Instance: {}", id);
        println!("   Public IP: {}", ip);
        println!("   URL: http://{}:8080", ip);
    }

    report(&result, quiet)
}
