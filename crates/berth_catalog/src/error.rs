//! Error types for catalog construction.

use berth_core::CoreError;
use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors that can occur while assembling a catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Required output '{0}' is missing")]
    MissingOutput(String),

    #[error("Output '{key}' has unexpected shape: {message}")]
    InvalidOutput { key: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}
