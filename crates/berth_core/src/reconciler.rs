//! The reconciliation walk.
//!
//! The reconciler visits catalog nodes in topological order. For each node it
//! discovers an existing resource or creates one, applies tags, waits for
//! readiness where the spec declares it, and records the handle. A failing
//! node never aborts the walk: its dependents are skipped and everything else
//! proceeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use berth_provider::{CloudProvider, ProviderError, RemoteResource};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::catalog::ResourceCatalog;
use crate::discoverer::{Discoverer, Discovery};
use crate::error::{NodeError, NodeFailure};
use crate::payload::PayloadRenderer;
use crate::resource::{Origin, ResourceHandle, ResourceSpec};
use crate::result::{NodeEvent, ReconciliationResult};
use crate::retry::{RetryError, RetryPolicy};
use crate::waiter::{cancellation, WaitError, WaitSettings, Waiter};

/// Tunables for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub retry: RetryPolicy,
    pub wait: WaitSettings,
    /// Nodes reconciled at once; 1 walks strictly in topological order
    pub max_concurrency: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            wait: WaitSettings::default(),
            max_concurrency: 1,
        }
    }
}

/// How a single node ended.
#[derive(Debug)]
enum NodeOutcome {
    Ready { handle: ResourceHandle, waited: bool },
    /// Exists, but readiness was not confirmed
    Pending { handle: ResourceHandle, failure: NodeFailure },
    /// External resource not found
    Absent,
    Failed(NodeFailure),
}

/// Progress of a node during the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Resolved,
    Unresolved,
}

/// Walks a [`ResourceCatalog`] against a provider.
pub struct Reconciler {
    provider: Arc<dyn CloudProvider>,
    discoverer: Discoverer,
    waiter: Waiter,
    renderer: PayloadRenderer,
    settings: ReconcilerSettings,
    cancel: Option<watch::Receiver<bool>>,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            discoverer: Discoverer::new(provider.clone()),
            waiter: Waiter::new(provider.clone()),
            renderer: PayloadRenderer::new(),
            settings: ReconcilerSettings::default(),
            cancel: None,
            provider,
        }
    }

    pub fn with_settings(mut self, settings: ReconcilerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    pub fn with_wait(mut self, wait: WaitSettings) -> Self {
        self.settings.wait = wait;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.settings.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Stop launching nodes and abort waits once the signal turns `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.waiter = self.waiter.with_cancel(cancel.clone());
        self.cancel = Some(cancel);
        self
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    fn cancel_requested(&self) -> bool {
        self.cancel.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Reconcile every node of the catalog and return the (possibly partial) result.
    pub async fn reconcile(&self, catalog: &ResourceCatalog) -> ReconciliationResult {
        let mut result = ReconciliationResult::new(catalog.name());
        let specs = catalog.specs();
        let graph = catalog.graph();
        let max_concurrency = self.settings.max_concurrency.max(1);

        info!(
            "Reconciling '{}' ({} resources) with provider {}",
            catalog.name(),
            catalog.len(),
            self.provider.name()
        );

        let mut states = vec![NodeState::Waiting; specs.len()];
        let mut chains: Vec<Vec<String>> = vec![Vec::new(); specs.len()];
        let mut queue: Vec<usize> = catalog.order().to_vec();
        let mut in_flight = FuturesUnordered::new();

        let cancelled = cancellation(self.cancel.clone());
        tokio::pin!(cancelled);
        let mut cancel_seen = false;

        loop {
            if !cancel_seen && self.cancel_requested() {
                cancel_seen = true;
            }

            if cancel_seen {
                for index in queue.drain(..) {
                    let spec = &specs[index];
                    warn!("{} '{}' not started: run cancelled", spec.kind, spec.logical_name);
                    states[index] = NodeState::Unresolved;
                    result.errors.push(NodeError::new(
                        spec.kind,
                        spec.logical_name.clone(),
                        NodeFailure::Cancelled { id: None },
                    ));
                    result.record(
                        &spec.logical_name,
                        NodeEvent::Skipped {
                            reason: "cancelled".to_string(),
                        },
                    );
                    result.stats.skipped += 1;
                }
            }

            let mut i = 0;
            while i < queue.len() && in_flight.len() < max_concurrency {
                let index = queue[i];
                let dependencies = graph.dependencies(index);

                if dependencies.iter().any(|&d| matches!(states[d], NodeState::Waiting | NodeState::Running)) {
                    i += 1;
                    continue;
                }
                queue.remove(i);

                let spec = &specs[index];
                let missing: Vec<usize> = dependencies
                    .iter()
                    .copied()
                    .filter(|&d| states[d] == NodeState::Unresolved)
                    .collect();

                if let Some(&first) = missing.first() {
                    let mut chain = chains[first].clone();
                    chain.push(specs[first].logical_name.clone());
                    let missing_names: Vec<String> =
                        missing.iter().map(|&d| specs[d].logical_name.clone()).collect();

                    warn!(
                        "{} '{}' skipped: unresolved dependencies {}",
                        spec.kind,
                        spec.logical_name,
                        missing_names.join(", ")
                    );
                    result.record(
                        &spec.logical_name,
                        NodeEvent::Skipped {
                            reason: format!("unresolved dependencies: {}", missing_names.join(", ")),
                        },
                    );
                    result.errors.push(
                        NodeError::new(
                            spec.kind,
                            spec.logical_name.clone(),
                            NodeFailure::DependencyUnresolved { missing: missing_names },
                        )
                        .with_chain(chain.clone()),
                    );
                    result.stats.skipped += 1;
                    chains[index] = chain;
                    states[index] = NodeState::Unresolved;
                    continue;
                }

                let handles: BTreeMap<String, ResourceHandle> = spec
                    .depends_on
                    .iter()
                    .filter_map(|d| result.handles.get(d).map(|h| (d.clone(), h.clone())))
                    .collect();

                debug!("Starting {} '{}'", spec.kind, spec.logical_name);
                result.record(&spec.logical_name, NodeEvent::Started);
                states[index] = NodeState::Running;
                in_flight.push(self.run_node(index, spec, handles));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = &mut cancelled, if !cancel_seen => {
                    warn!("Cancellation requested; finishing in-flight resources");
                    cancel_seen = true;
                }
                Some((index, outcome)) = in_flight.next() => {
                    let resolved = record_outcome(&mut result, &specs[index], outcome);
                    states[index] = if resolved { NodeState::Resolved } else { NodeState::Unresolved };
                }
                else => break,
            }
        }

        let position: BTreeMap<&str, usize> = catalog
            .order()
            .iter()
            .enumerate()
            .map(|(pos, &i)| (specs[i].logical_name.as_str(), pos))
            .collect();
        result
            .errors
            .sort_by_key(|e| position.get(e.logical_name.as_str()).copied().unwrap_or(usize::MAX));
        result.completed_at = Some(chrono::Utc::now());

        info!(
            "Reconciled '{}': {} discovered, {} created, {} pending, {} absent, {} error(s)",
            catalog.name(),
            result.stats.discovered,
            result.stats.created,
            result.pending.len(),
            result.absent.len(),
            result.errors.len()
        );
        result
    }

    async fn run_node(
        &self,
        index: usize,
        spec: &ResourceSpec,
        handles: BTreeMap<String, ResourceHandle>,
    ) -> (usize, NodeOutcome) {
        (index, self.reconcile_node(spec, &handles).await)
    }

    /// Discover-or-create a single node whose dependencies are resolved.
    async fn reconcile_node(&self, spec: &ResourceSpec, handles: &BTreeMap<String, ResourceHandle>) -> NodeOutcome {
        match self.discoverer.find(spec, handles).await {
            Err(failure) => NodeOutcome::Failed(failure),
            Ok(Discovery::Ambiguous { strategy, candidates }) => {
                NodeOutcome::Failed(NodeFailure::AmbiguousMatch { strategy, candidates })
            }
            Ok(Discovery::Found { resource, strategy }) => {
                info!(
                    "{} '{}' discovered as {} ({})",
                    spec.kind, spec.logical_name, resource.id, strategy
                );
                self.finish_discovered(spec, resource).await
            }
            Ok(Discovery::NotFound) if spec.is_external() => NodeOutcome::Absent,
            Ok(Discovery::NotFound) => self.create(spec, handles).await,
        }
    }

    async fn create(&self, spec: &ResourceSpec, handles: &BTreeMap<String, ResourceHandle>) -> NodeOutcome {
        let payload = match self.renderer.render_value(&spec.desired_attributes, handles) {
            Ok(payload) => payload,
            Err(failure) => return NodeOutcome::Failed(failure),
        };

        let what = format!("create {} '{}'", spec.kind, spec.logical_name);
        let created = self
            .settings
            .retry
            .run(&what, || self.provider.create(spec.kind, &payload))
            .await;

        let mut resource = match created {
            Ok(resource) => resource,
            Err(RetryError::Fatal(ProviderError::AlreadyExists(message))) => {
                return self.adopt_existing(spec, handles, &message).await;
            }
            Err(e) => return NodeOutcome::Failed(retry_failure(e)),
        };
        info!("{} '{}' created as {}", spec.kind, spec.logical_name, resource.id);

        if let Err(failure) = self.apply_tags(spec, &mut resource).await {
            return NodeOutcome::Pending {
                handle: ResourceHandle::from_remote(spec.logical_name.clone(), &resource, Origin::Created),
                failure: NodeFailure::Provider {
                    message: format!("created {} but tagging failed: {}", resource.id, failure),
                },
            };
        }

        self.settle(spec, resource, Origin::Created).await
    }

    /// Finish tagging a managed resource found without all of its tags.
    async fn finish_discovered(&self, spec: &ResourceSpec, mut resource: RemoteResource) -> NodeOutcome {
        if !spec.is_external() {
            if let Err(failure) = self.apply_tags(spec, &mut resource).await {
                return NodeOutcome::Pending {
                    handle: ResourceHandle::from_remote(spec.logical_name.clone(), &resource, Origin::Discovered),
                    failure: NodeFailure::Provider {
                        message: format!("found {} but tagging failed: {}", resource.id, failure),
                    },
                };
            }
        }
        self.settle(spec, resource, Origin::Discovered).await
    }

    /// Apply the spec tags the resource does not carry yet, `Name` first.
    async fn apply_tags(&self, spec: &ResourceSpec, resource: &mut RemoteResource) -> Result<(), NodeFailure> {
        let name_tag = spec.tags.get_key_value("Name");
        let others = spec.tags.iter().filter(|(key, _)| key.as_str() != "Name");
        for (key, value) in name_tag.into_iter().chain(others) {
            if resource.tags.get(key) == Some(value) {
                continue;
            }
            let what = format!("tag {} {}={}", resource.id, key, value);
            let id = resource.id.clone();
            self.settings
                .retry
                .run(&what, || self.provider.tag(&id, key, value))
                .await
                .map_err(retry_failure)?;
            resource.tags.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// The resource appeared between discovery and create: discover once more.
    async fn adopt_existing(
        &self,
        spec: &ResourceSpec,
        handles: &BTreeMap<String, ResourceHandle>,
        message: &str,
    ) -> NodeOutcome {
        warn!(
            "{} '{}' already exists ({}); rediscovering",
            spec.kind, spec.logical_name, message
        );
        match self.discoverer.find(spec, handles).await {
            Ok(Discovery::Found { resource, .. }) => {
                info!("{} '{}' adopted {}", spec.kind, spec.logical_name, resource.id);
                self.finish_discovered(spec, resource).await
            }
            Ok(Discovery::Ambiguous { strategy, candidates }) => {
                NodeOutcome::Failed(NodeFailure::AmbiguousMatch { strategy, candidates })
            }
            Ok(Discovery::NotFound) => NodeOutcome::Failed(NodeFailure::Provider {
                message: format!("provider reported '{}' but no match strategy finds it", message),
            }),
            Err(failure) => NodeOutcome::Failed(failure),
        }
    }

    /// Wait for readiness when the spec declares a check.
    async fn settle(&self, spec: &ResourceSpec, resource: RemoteResource, origin: Origin) -> NodeOutcome {
        let handle = ResourceHandle::from_remote(spec.logical_name.clone(), &resource, origin);
        let Some(check) = &spec.readiness else {
            return NodeOutcome::Ready { handle, waited: false };
        };
        if check.is_ready(&resource) {
            return NodeOutcome::Ready { handle, waited: false };
        }

        info!(
            "Waiting for {} '{}' ({}) to become ready",
            spec.kind, spec.logical_name, resource.id
        );
        let wait = &self.settings.wait;
        let waited = self
            .waiter
            .wait_until_ready(
                spec.kind,
                &resource.id,
                |r| check.is_ready(r),
                wait.interval(),
                wait.timeout(),
            )
            .await;

        match waited {
            Ok(ready) => NodeOutcome::Ready {
                handle: ResourceHandle::from_remote(spec.logical_name.clone(), &ready, origin),
                waited: true,
            },
            Err(WaitError::Timeout { waited, last }) => {
                let handle = match last {
                    Some(last) => ResourceHandle::from_remote(spec.logical_name.clone(), &last, origin),
                    None => handle,
                };
                NodeOutcome::Pending {
                    failure: NodeFailure::AsyncTimeout {
                        id: handle.id.clone(),
                        waited_ms: waited.as_millis() as u64,
                    },
                    handle,
                }
            }
            Err(WaitError::Cancelled) => NodeOutcome::Pending {
                failure: NodeFailure::Cancelled {
                    id: Some(handle.id.clone()),
                },
                handle,
            },
            Err(WaitError::Provider(e)) => NodeOutcome::Pending {
                failure: NodeFailure::Provider { message: e.to_string() },
                handle,
            },
        }
    }
}

fn retry_failure(error: RetryError) -> NodeFailure {
    match error {
        RetryError::Exhausted { attempts, last } => NodeFailure::RetriesExhausted {
            attempts,
            message: last.to_string(),
        },
        RetryError::Fatal(e) if e.is_permission_or_validation() => {
            NodeFailure::PermissionOrValidation { message: e.to_string() }
        }
        RetryError::Fatal(e) => NodeFailure::Provider { message: e.to_string() },
    }
}

/// Apply a node outcome to the result. Returns whether the node resolved.
fn record_outcome(result: &mut ReconciliationResult, spec: &ResourceSpec, outcome: NodeOutcome) -> bool {
    let name = spec.logical_name.as_str();
    match outcome {
        NodeOutcome::Ready { handle, waited } => {
            match handle.origin {
                Origin::Discovered => result.stats.discovered += 1,
                Origin::Created => result.stats.created += 1,
            }
            if waited {
                result.stats.waited += 1;
            }
            result.record(name, NodeEvent::Completed { origin: handle.origin });
            result.handles.insert(name.to_string(), handle);
            true
        }
        NodeOutcome::Pending { handle, failure } => {
            error!("{} '{}' ({}) not ready: {}", spec.kind, name, handle.id, failure);
            result.record(name, NodeEvent::Pending);
            result.errors.push(NodeError::new(spec.kind, name, failure));
            result.pending.insert(name.to_string(), handle);
            result.stats.failed += 1;
            false
        }
        NodeOutcome::Absent => {
            warn!("{} '{}' is managed externally and was not found", spec.kind, name);
            result.record(name, NodeEvent::Absent);
            result.absent.push(name.to_string());
            false
        }
        NodeOutcome::Failed(failure) => {
            error!("{} '{}' failed: {}", spec.kind, name, failure);
            result.record(
                name,
                NodeEvent::Failed {
                    reason: failure.to_string(),
                },
            );
            result.errors.push(NodeError::new(spec.kind, name, failure));
            result.stats.failed += 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{MatchStrategy, ReadinessCheck};
    use berth_provider::{Fault, Operation, ResourceKind, SimulatedCloud};
    use serde_json::json;
    use std::time::Duration;

    fn fast() -> ReconcilerSettings {
        ReconcilerSettings {
            retry: RetryPolicy::immediate(3),
            wait: WaitSettings::new(Duration::from_millis(1), Duration::from_millis(500)),
            max_concurrency: 1,
        }
    }

    fn chain_catalog() -> ResourceCatalog {
        ResourceCatalog::builder("chain")
            .resource(
                ResourceSpec::new(ResourceKind::Network, "network")
                    .strategy(MatchStrategy::tag("Name", "vpc"))
                    .attributes(json!({"cidr_block": "10.0.0.0/16"}))
                    .tag("Name", "vpc"),
            )
            .resource(
                ResourceSpec::new(ResourceKind::Subnet, "subnet")
                    .strategy(MatchStrategy::tag("Name", "subnet"))
                    .attributes(json!({"vpc_id": "{{network.id}}", "cidr_block": "10.0.1.0/24"}))
                    .depends_on("network")
                    .tag("Name", "subnet"),
            )
            .resource(
                ResourceSpec::new(ResourceKind::NatGateway, "nat")
                    .strategy(MatchStrategy::tag("Name", "nat"))
                    .attributes(json!({"subnet_id": "{{subnet.id}}"}))
                    .depends_on("subnet")
                    .tag("Name", "nat")
                    .ready_when(ReadinessCheck::state(["available"])),
            )
            .resource(
                ResourceSpec::new(ResourceKind::RouteTable, "routes")
                    .strategy(MatchStrategy::tag("Name", "routes"))
                    .attributes(json!({"vpc_id": "{{network.id}}", "nat_gateway_id": "{{nat.id}}"}))
                    .depends_on("network")
                    .depends_on("nat")
                    .tag("Name", "routes"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_creates_in_order_and_renders_references() {
        let cloud = SimulatedCloud::new();
        let reconciler = Reconciler::new(Arc::new(cloud.clone())).with_settings(fast());

        let result = reconciler.reconcile(&chain_catalog()).await;
        assert!(result.is_complete(), "errors: {:?}", result.errors);
        assert_eq!(result.stats.created, 4);
        assert_eq!(result.stats.waited, 1);

        let network_id = &result.handle("network").unwrap().id;
        let subnet = &cloud.resources(ResourceKind::Subnet)[0];
        assert_eq!(subnet.attributes.get("vpc-id"), Some(&json!(network_id)));
        assert_eq!(subnet.name_tag(), Some("subnet"));

        let kinds: Vec<ResourceKind> = cloud
            .get_calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Create)
            .filter_map(|c| c.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Network,
                ResourceKind::Subnet,
                ResourceKind::NatGateway,
                ResourceKind::RouteTable
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_transitively() {
        let cloud = SimulatedCloud::new().inject_persistent_fault(
            Operation::Create,
            Some(ResourceKind::Subnet),
            Fault::Validation,
        );
        let reconciler = Reconciler::new(Arc::new(cloud.clone())).with_settings(fast());

        let result = reconciler.reconcile(&chain_catalog()).await;
        assert!(result.handle("network").is_some());

        let names: Vec<&str> = result.errors.iter().map(|e| e.logical_name.as_str()).collect();
        assert_eq!(names, vec!["subnet", "nat", "routes"]);
        assert!(matches!(
            result.errors[0].failure,
            NodeFailure::PermissionOrValidation { .. }
        ));

        let routes = result.error_for("routes").unwrap();
        assert_eq!(
            routes.failure,
            NodeFailure::DependencyUnresolved {
                missing: vec!["nat".to_string()]
            }
        );
        assert_eq!(routes.dependency_chain, vec!["subnet".to_string(), "nat".to_string()]);
        assert_eq!(cloud.create_count(ResourceKind::Subnet), 1);
        assert_eq!(cloud.create_count(ResourceKind::NatGateway), 0);
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_handle_pending() {
        let cloud = SimulatedCloud::new().never_ready(ResourceKind::NatGateway);
        let settings = ReconcilerSettings {
            wait: WaitSettings::new(Duration::from_millis(5), Duration::from_millis(30)),
            ..fast()
        };
        let reconciler = Reconciler::new(Arc::new(cloud.clone())).with_settings(settings);

        let result = reconciler.reconcile(&chain_catalog()).await;
        assert!(result.pending.contains_key("nat"));
        assert!(matches!(
            result.error_for("nat").unwrap().failure,
            NodeFailure::AsyncTimeout { .. }
        ));
        assert!(result.error_for("routes").unwrap().failure.is_dependency_unresolved());

        // The next run finds the NAT gateway by tag instead of creating another
        let rerun = Reconciler::new(Arc::new(cloud.clone())).with_settings(fast());
        let second = rerun.reconcile(&chain_catalog()).await;
        assert_eq!(cloud.create_count(ResourceKind::NatGateway), 1);
        assert!(second.pending.contains_key("nat"));
    }

    #[tokio::test]
    async fn test_concurrent_walk_matches_sequential() {
        let cloud = SimulatedCloud::new();
        let reconciler = Reconciler::new(Arc::new(cloud.clone()))
            .with_settings(fast())
            .with_max_concurrency(4);

        let catalog = ResourceCatalog::builder("leaves")
            .resources((0..6).map(|i| {
                ResourceSpec::new(ResourceKind::Registry, format!("registry:{}", i))
                    .strategy(MatchStrategy::tag("Name", format!("repo-{}", i)))
                    .attributes(json!({"name": format!("repo-{}", i)}))
                    .tag("Name", format!("repo-{}", i))
            }))
            .build()
            .unwrap();

        let result = reconciler.reconcile(&catalog).await;
        assert!(result.is_complete());
        assert_eq!(result.handles.len(), 6);

        let again = reconciler.reconcile(&catalog).await;
        assert_eq!(again.stats.discovered, 6);
        assert_eq!(cloud.create_count(ResourceKind::Registry), 6);
    }
}
