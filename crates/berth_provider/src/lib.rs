//! # berth_provider
//!
//! Cloud provider capability port for berth.
//!
//! The reconciliation engine only ever talks to a provider through the
//! [`CloudProvider`] trait: describe/list with filters, create from a payload,
//! tag, and poll. This keeps the engine testable without live provider calls.
//!
//! # Features
//!
//! - **Resource kinds**: network, subnets, gateways, route tables, security
//!   groups, load balancing, cluster, registries, roles, log groups, instances
//! - **Error taxonomy**: retryable vs. permission/validation failures
//! - **Simulated cloud**: in-memory provider with asynchronous provisioning,
//!   name uniqueness, fault injection, call capture and optional file backing
//!
//! # Example
//!
//! ```rust,no_run
//! use berth_provider::{CloudProvider, Filter, ResourceKind, SimulatedCloud};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cloud = SimulatedCloud::new();
//!
//!     let vpc = cloud
//!         .create(ResourceKind::Network, &json!({"cidr_block": "10.100.0.0/16"}))
//!         .await?;
//!     cloud.tag(&vpc.id, "Name", "shop-prod-vpc").await?;
//!
//!     let found = cloud
//!         .describe(ResourceKind::Network, &[Filter::tag("Name", "shop-prod-vpc")])
//!         .await?;
//!     println!("Found {} network(s)", found.len());
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod kind;
pub mod port;
pub mod sim;

pub use error::{ProviderError, ProviderResult};
pub use kind::ResourceKind;
pub use port::{CloudProvider, Filter, RemoteResource};
pub use sim::{CapturedCall, CloudState, Fault, Operation, SimulatedCloud};
