//! Reconciliation results.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, NodeError};
use crate::resource::{Origin, ResourceHandle};

/// Node lifecycle events, in the order the walk observed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    Started,
    Completed { origin: Origin },
    /// Exists but not confirmed ready
    Pending,
    /// External resource not found
    Absent,
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub logical_name: String,
    #[serde(flatten)]
    pub event: NodeEvent,
    pub at: DateTime<Utc>,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub discovered: usize,
    pub created: usize,
    pub waited: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of one reconciliation run.
///
/// Partial results are meaningful: every handle recorded here exists in the
/// provider, so a later run rediscovers it instead of recreating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub catalog: String,
    /// Completed nodes
    pub handles: BTreeMap<String, ResourceHandle>,
    /// Node errors, in topological order of the failing node
    pub errors: Vec<NodeError>,
    /// Resources that exist but did not reach their ready state
    pub pending: BTreeMap<String, ResourceHandle>,
    /// External resources that were not found
    pub absent: Vec<String>,
    pub journal: Vec<JournalEntry>,
    pub stats: RunStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReconciliationResult {
    pub fn new(catalog: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            handles: BTreeMap::new(),
            errors: Vec::new(),
            pending: BTreeMap::new(),
            absent: Vec::new(),
            journal: Vec::new(),
            stats: RunStats::default(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// True when every node completed.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.pending.is_empty() && self.absent.is_empty()
    }

    pub fn handle(&self, logical_name: &str) -> Option<&ResourceHandle> {
        self.handles.get(logical_name)
    }

    pub fn error_for(&self, logical_name: &str) -> Option<&NodeError> {
        self.errors.iter().find(|e| e.logical_name == logical_name)
    }

    /// Errors that are not just fallout of an earlier failure.
    pub fn root_causes(&self) -> impl Iterator<Item = &NodeError> {
        self.errors.iter().filter(|e| !e.failure.is_dependency_unresolved())
    }

    pub fn created(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.values().filter(|h| h.origin == Origin::Created)
    }

    pub(crate) fn record(&mut self, logical_name: &str, event: NodeEvent) {
        self.journal.push(JournalEntry {
            logical_name: logical_name.to_string(),
            event,
            at: Utc::now(),
        });
    }

    /// Save the result as pretty JSON.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a previously saved result.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeFailure;
    use berth_provider::{RemoteResource, ResourceKind};
    use tempfile::tempdir;

    fn sample() -> ReconciliationResult {
        let mut result = ReconciliationResult::new("shop-prod");
        let cluster = RemoteResource::new(ResourceKind::Cluster, "arn:cluster").with_arn("arn:cluster");
        result.handles.insert(
            "cluster".to_string(),
            ResourceHandle::from_remote("cluster", &cluster, Origin::Created),
        );
        result.record("cluster", NodeEvent::Completed { origin: Origin::Created });
        result.errors.push(NodeError::new(
            ResourceKind::NatGateway,
            "nat-gateway",
            NodeFailure::PermissionOrValidation {
                message: "denied".to_string(),
            },
        ));
        result.errors.push(
            NodeError::new(
                ResourceKind::RouteTable,
                "route-table:private",
                NodeFailure::DependencyUnresolved {
                    missing: vec!["nat-gateway".to_string()],
                },
            )
            .with_chain(vec!["nat-gateway".to_string()]),
        );
        result
    }

    #[test]
    fn test_queries() {
        let result = sample();
        assert!(!result.is_complete());
        assert!(result.handle("cluster").is_some());
        assert!(result.error_for("route-table:private").is_some());
        let roots: Vec<&str> = result.root_causes().map(|e| e.logical_name.as_str()).collect();
        assert_eq!(roots, vec!["nat-gateway"]);
        assert_eq!(result.created().count(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("result.json");

        let result = sample();
        result.save(&path).unwrap();

        let loaded = ReconciliationResult::load(&path).unwrap();
        assert_eq!(loaded.catalog, "shop-prod");
        assert_eq!(loaded.errors, result.errors);
        assert_eq!(loaded.journal, result.journal);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"event\": \"completed\""));
        assert!(raw.contains("\"type\": \"dependency_unresolved\""));
    }
}
