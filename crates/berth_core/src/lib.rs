//! # berth_core
//!
//! Idempotent discover-or-create reconciliation engine for berth.
//!
//! Running the engine repeatedly against the same provider converges to one
//! consistent set of resources: every declared resource is looked up before
//! it is created, creation follows the dependency graph, asynchronously
//! provisioned resources are waited on, and an interrupted run can simply be
//! run again.
//!
//! # Architecture
//!
//! - **ResourceCatalog**: validated specs plus their dependency graph
//! - **Discoverer**: ordered match strategies against the provider
//! - **Waiter**: poll-until-ready with timeout and cancellation
//! - **Reconciler**: topological discover-or-create walk
//! - **OutputExporter**: flat output map for downstream stages
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use berth_core::{MatchStrategy, Reconciler, ResourceCatalog, ResourceSpec};
//! use berth_provider::{ResourceKind, SimulatedCloud};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ResourceCatalog::builder("demo")
//!     .resource(
//!         ResourceSpec::new(ResourceKind::Network, "network")
//!             .strategy(MatchStrategy::tag("Name", "demo-vpc"))
//!             .attributes(json!({"cidr_block": "10.0.0.0/16"}))
//!             .tag("Name", "demo-vpc"),
//!     )
//!     .build()?;
//!
//! let reconciler = Reconciler::new(Arc::new(SimulatedCloud::new()));
//! let result = reconciler.reconcile(&catalog).await;
//! println!("vpc: {}", result.handle("network").map(|h| h.id.as_str()).unwrap_or("-"));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod discoverer;
pub mod error;
pub mod exporter;
pub mod graph;
pub mod payload;
pub mod reconciler;
pub mod resource;
pub mod result;
pub mod retry;
pub mod waiter;

// Re-export main types for convenience
pub use catalog::{CatalogBuilder, ResourceCatalog};
pub use config::EnvironmentConfig;
pub use discoverer::{Discoverer, Discovery, StrategyOutcome};
pub use error::{CoreError, CoreResult, MissingOutput, NodeError, NodeFailure};
pub use exporter::{OutputExporter, OutputKey, OutputSource};
pub use graph::DependencyGraph;
pub use payload::PayloadRenderer;
pub use reconciler::{Reconciler, ReconcilerSettings};
pub use resource::{MatchStrategy, Origin, Provisioning, ReadinessCheck, ResourceHandle, ResourceSpec};
pub use result::{JournalEntry, NodeEvent, ReconciliationResult, RunStats};
pub use retry::{RetryError, RetryPolicy};
pub use waiter::{WaitError, WaitSettings, Waiter};
