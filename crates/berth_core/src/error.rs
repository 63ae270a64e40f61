//! Error types for the core module.

use berth_provider::ResourceKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building a catalog, loading configuration or
/// exporting outputs. Reconciliation itself never returns these; node-level
/// problems are recorded as [`NodeError`]s in the result.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Duplicate logical name in catalog: {0}")]
    DuplicateLogicalName(String),

    #[error("Resource '{node}' depends on unknown resource '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("Resource '{node}' references '{reference}' without depending on it")]
    UndeclaredReference { node: String, reference: String },

    #[error("Invalid match strategies for '{node}': {message}")]
    InvalidStrategy { node: String, message: String },

    #[error("Incomplete outputs: {}", format_missing(.0))]
    IncompleteOutputs(Vec<MissingOutput>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// An output key that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingOutput {
    pub key: String,
    pub logical_name: String,
    pub reason: String,
}

fn format_missing(missing: &[MissingOutput]) -> String {
    missing
        .iter()
        .map(|m| match m.logical_name.as_str() {
            "" => format!("{} ({})", m.key, m.reason),
            name => format!("{} ({}: {})", m.key, name, m.reason),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why a single node did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeFailure {
    #[error("strategy '{strategy}' matched {} resources: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousMatch {
        strategy: String,
        candidates: Vec<String>,
    },

    #[error("{id} not ready after {waited_ms}ms")]
    AsyncTimeout { id: String, waited_ms: u64 },

    #[error("unresolved dependencies: {}", .missing.join(", "))]
    DependencyUnresolved { missing: Vec<String> },

    #[error("rejected by provider: {message}")]
    PermissionOrValidation { message: String },

    #[error("gave up after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("reference '{reference}' could not be resolved")]
    UnresolvedReference { reference: String },

    #[error("cancelled{}", .id.as_ref().map(|i| format!(" while waiting for {}", i)).unwrap_or_default())]
    Cancelled { id: Option<String> },

    #[error("provider error: {message}")]
    Provider { message: String },
}

impl NodeFailure {
    pub fn is_dependency_unresolved(&self) -> bool {
        matches!(self, NodeFailure::DependencyUnresolved { .. })
    }
}

/// A failure recorded against one node of the catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} '{logical_name}': {failure}")]
pub struct NodeError {
    pub kind: ResourceKind,
    pub logical_name: String,
    /// Path from the root-cause node down to this node (empty for root causes)
    pub dependency_chain: Vec<String>,
    pub failure: NodeFailure,
}

impl NodeError {
    pub fn new(kind: ResourceKind, logical_name: impl Into<String>, failure: NodeFailure) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            dependency_chain: Vec::new(),
            failure,
        }
    }

    pub fn with_chain(mut self, chain: Vec<String>) -> Self {
        self.dependency_chain = chain;
        self
    }
}
