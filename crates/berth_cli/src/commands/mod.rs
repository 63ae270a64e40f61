//! CLI command definitions.
//!
//! Every subcommand works against the same environment description: a
//! config file, overridden by flags and `BERTH_*` environment variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use berth_catalog::CatalogProfile;
use berth_core::{EnvironmentConfig, NodeFailure, ReconciliationResult};
use berth_provider::SimulatedCloud;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

pub mod apply;
pub mod bootstrap;
pub mod outputs;
pub mod plan;

/// berth - idempotent container environment provisioning
#[derive(Parser)]
#[command(name = "berth")]
#[command(version, about = "berth - idempotent container environment provisioning")]
#[command(long_about = r#"
berth ensures a fixed set of cloud resources exists for a container
environment. Every resource is looked up before it is created, so a failed
or interrupted run can simply be run again.

COMMANDS:
  plan       → Show the catalog in dependency order
  apply      → Discover or create every resource, then write outputs
  outputs    → Re-export outputs from the last result
  bootstrap  → Launch a build server into an applied environment

EXIT CODES:
  0   - Success
  1   - General error
  2   - Invalid arguments
  3   - Configuration error
  4   - Incomplete reconciliation
  130 - Interrupted
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress the summary
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the resource catalog in dependency order
    Plan(plan::PlanArgs),

    /// Reconcile the environment
    Apply(apply::ApplyArgs),

    /// Export outputs from a saved result
    Outputs(outputs::OutputsArgs),

    /// Launch a build server into the environment
    Bootstrap(bootstrap::BootstrapArgs),
}

/// Failures the exit code distinguishes.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Reconciliation incomplete: {failed} failed, {pending} pending, {absent} absent")]
    Incomplete {
        failed: usize,
        pending: usize,
        absent: usize,
    },

    #[error("Reconciliation interrupted")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Where the environment is described.
#[derive(Args, Debug, Clone, Default)]
pub struct EnvironmentArgs {
    /// Environment config file (.yaml, .yml or .toml)
    #[arg(short, long, env = "BERTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project name
    #[arg(long, env = "BERTH_PROJECT")]
    pub project: Option<String>,

    /// Environment name
    #[arg(short, long, env = "BERTH_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Target region
    #[arg(long, env = "BERTH_REGION")]
    pub region: Option<String>,

    /// Reconcile up to this many independent resources at once
    #[arg(long, env = "BERTH_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Catalog profile (standard, adopt, minimal)
    #[arg(long, default_value = "standard", env = "BERTH_PROFILE")]
    pub profile: String,

    /// Serve HTTPS with the issued certificate for this domain
    #[arg(long, env = "BERTH_DOMAIN")]
    pub domain: Option<String>,
}

impl EnvironmentArgs {
    /// Config file (or defaults) with flag and environment overrides applied.
    pub fn load_config(&self) -> Result<EnvironmentConfig> {
        let mut config = match &self.config {
            Some(path) => EnvironmentConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EnvironmentConfig::default(),
        };

        if let Some(project) = &self.project {
            config.project = project.clone();
        }
        if let Some(environment) = &self.environment {
            config.environment = environment.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }

        config.validate().context("Invalid environment configuration")?;
        debug!("Environment {}/{} in {}", config.project, config.environment, config.region);
        Ok(config)
    }

    pub fn load_profile(&self) -> Result<CatalogProfile> {
        let mut profile = CatalogProfile::from_name(&self.profile).ok_or_else(|| {
            RunError::InvalidArgument(format!(
                "unknown profile '{}' (expected standard, adopt or minimal)",
                self.profile
            ))
        })?;
        if let Some(domain) = &self.domain {
            profile = profile.with_certificate_domain(domain.clone());
        }
        profile.validate().context("Invalid catalog profile")?;
        Ok(profile)
    }
}

/// Where the simulated provider keeps its state between runs.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Provider state file
    #[arg(long, default_value = ".berth/cloud.json", env = "BERTH_STATE")]
    pub state: PathBuf,
}

impl StateArgs {
    pub fn open(&self, region: &str) -> Result<SimulatedCloud> {
        let cloud = SimulatedCloud::open(&self.state)
            .with_context(|| format!("Failed to open provider state {}", self.state.display()))?;
        Ok(cloud.with_region(region))
    }

    pub fn save(&self, cloud: &SimulatedCloud) -> Result<()> {
        cloud
            .persist()
            .with_context(|| format!("Failed to save provider state {}", self.state.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty JSON object
    Json,
    /// `KEY=value` lines for shell pipelines
    Env,
}

/// Render an output map.
pub fn render_outputs(outputs: &BTreeMap<String, Value>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(outputs)?),
        OutputFormat::Env => {
            let mut lines = Vec::with_capacity(outputs.len());
            for (key, value) in outputs {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other)?,
                };
                lines.push(format!("{}={}", key.to_uppercase(), rendered));
            }
            Ok(lines.join("\n"))
        }
    }
}

pub fn write_outputs(path: &Path, outputs: &BTreeMap<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_outputs(outputs, OutputFormat::Json)?)
        .with_context(|| format!("Failed to write outputs {}", path.display()))
}

pub fn read_outputs(path: &Path) -> Result<BTreeMap<String, Value>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read outputs {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Malformed outputs {}", path.display()))
}

/// Flip the cancel signal on the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight resources finish");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Print what happened and map an unfinished run to an error.
pub fn report(result: &ReconciliationResult, quiet: bool) -> Result<()> {
    if !quiet {
        let stats = &result.stats;
        let elapsed = result
            .completed_at
            .map(|end| (end - result.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        println!(
            "📦 {}: {} discovered, {} created, {} waited, {} failed, {} skipped ({:.1}s)",
            result.catalog, stats.discovered, stats.created, stats.waited, stats.failed, stats.skipped, elapsed
        );
        for error in result.root_causes() {
            println!("   ❌ {}", error);
        }
        for handle in result.pending.values() {
            println!("   ⏳ {} '{}' ({}) not ready yet", handle.kind, handle.logical_name, handle.id);
        }
        for name in &result.absent {
            println!("   ⚠️  {} was not found", name);
        }
    }

    if result.is_complete() {
        return Ok(());
    }
    if result
        .errors
        .iter()
        .any(|e| matches!(e.failure, NodeFailure::Cancelled { .. }))
    {
        return Err(RunError::Cancelled.into());
    }
    Err(RunError::Incomplete {
        failed: result.errors.len(),
        pending: result.pending.len(),
        absent: result.absent.len(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("berth.yaml");
        fs::write(&path, "project: shop\nenvironment: staging\nregion: eu-west-1\n").unwrap();

        let args = EnvironmentArgs {
            config: Some(path),
            environment: Some("prod".into()),
            max_concurrency: Some(4),
            profile: "standard".into(),
            ..Default::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.project, "shop");
        assert_eq!(config.environment, "prod");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    fn test_profile_selection() {
        let args = EnvironmentArgs {
            profile: "adopt".into(),
            domain: Some("shop.example.com".into()),
            ..Default::default()
        };
        let profile = args.load_profile().unwrap();
        assert!(profile.https_enabled());

        let unknown = EnvironmentArgs {
            profile: "huge".into(),
            ..Default::default()
        };
        let err = unknown.load_profile().unwrap_err();
        assert!(err.downcast_ref::<RunError>().is_some());
    }

    #[test]
    fn test_outputs_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".berth").join("outputs.json");
        let outputs = BTreeMap::from([
            ("vpc_id".to_string(), json!("vpc-123")),
            ("subnet_ids".to_string(), json!(["subnet-a", "subnet-b"])),
        ]);

        write_outputs(&path, &outputs).unwrap();
        assert_eq!(read_outputs(&path).unwrap(), outputs);

        let env = render_outputs(&outputs, OutputFormat::Env).unwrap();
        assert_eq!(env, "SUBNET_IDS=[\"subnet-a\",\"subnet-b\"]\nVPC_ID=vpc-123");
    }

    #[test]
    fn test_report_maps_incomplete_run() {
        let mut result = ReconciliationResult::new("shop-prod-environment");
        assert!(report(&result, true).is_ok());

        result.absent.push("certificate".into());
        let err = report(&result, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::Incomplete { absent: 1, .. })
        ));
    }
}
