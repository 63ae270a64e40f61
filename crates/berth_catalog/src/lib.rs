//! # berth_catalog
//!
//! The fixed topology berth ensures for a container environment, and the
//! contract it hands to deployment pipelines.
//!
//! - [`container_environment`] builds the environment catalog for a
//!   [`CatalogProfile`]
//! - [`standard_outputs`] lists the output keys pipelines consume
//! - [`build_server_catalog`] bootstraps a build server from those outputs

pub mod build_server;
pub mod environment;
pub mod error;
pub mod outputs;
pub mod profile;

pub use build_server::{build_server_catalog, build_server_outputs, BuildServerSettings};
pub use environment::container_environment;
pub use error::{CatalogError, CatalogResult};
pub use outputs::standard_outputs;
pub use profile::{CatalogProfile, NetworkMode, RegistryDefinition};
