//! Resource catalog: the validated, immutable set of specs for one run.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::graph::DependencyGraph;
use crate::payload::PayloadRenderer;
use crate::resource::ResourceSpec;

/// A validated catalog of resource specs.
///
/// Construction checks that logical names are unique, that every dependency
/// exists, that the dependency graph is acyclic and that weak strategies come
/// last. Strategies are sorted by priority (stable, so declaration order
/// breaks ties).
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    name: String,
    specs: Vec<ResourceSpec>,
    index: HashMap<String, usize>,
    graph: DependencyGraph,
    order: Vec<usize>,
}

impl ResourceCatalog {
    pub fn builder(name: impl Into<String>) -> CatalogBuilder {
        CatalogBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Specs in declaration order.
    pub fn specs(&self) -> &[ResourceSpec] {
        &self.specs
    }

    pub fn get(&self, logical_name: &str) -> Option<&ResourceSpec> {
        self.index.get(logical_name).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, logical_name: &str) -> bool {
        self.index.contains_key(logical_name)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Declaration indices in topological order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Specs in topological order.
    pub fn ordered_specs(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.order.iter().map(|&i| &self.specs[i])
    }

    /// Names of every node that (transitively) depends on `logical_name`.
    pub fn transitive_dependents(&self, logical_name: &str) -> Vec<String> {
        let Some(&start) = self.index.get(logical_name) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.specs.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dependent in self.graph.dependents(node) {
                if !seen[dependent] {
                    seen[dependent] = true;
                    stack.push(dependent);
                }
            }
        }
        self.order
            .iter()
            .filter(|&&i| seen[i])
            .map(|&i| self.specs[i].logical_name.clone())
            .collect()
    }
}

/// Builder for [`ResourceCatalog`].
pub struct CatalogBuilder {
    name: String,
    specs: Vec<ResourceSpec>,
}

impl CatalogBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specs: Vec::new(),
        }
    }

    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn resources(mut self, specs: impl IntoIterator<Item = ResourceSpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn build(self) -> CoreResult<ResourceCatalog> {
        let renderer = PayloadRenderer::new();
        let mut specs = self.specs;
        for spec in &mut specs {
            validate_strategies(spec)?;
            validate_references(&renderer, spec)?;
            spec.strategies.sort_by_key(|s| s.priority);
        }

        let graph = DependencyGraph::from_specs(&specs)?;
        let order = graph.topological_order()?;
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.logical_name.clone(), i))
            .collect();

        debug!("Built catalog '{}' with {} resources", self.name, specs.len());

        Ok(ResourceCatalog {
            name: self.name,
            specs,
            index,
            graph,
            order,
        })
    }
}

/// Every `{{name.attr}}` reference must point at a declared dependency, so the
/// referenced handle is guaranteed to exist before the node runs.
fn validate_references(renderer: &PayloadRenderer, spec: &ResourceSpec) -> CoreResult<()> {
    let mut referenced = renderer.referenced_names(&spec.desired_attributes);
    for strategy in &spec.strategies {
        referenced.extend(renderer.referenced_names_in_filters(&strategy.filters));
    }
    match referenced.into_iter().find(|name| !spec.depends_on.contains(name)) {
        Some(reference) => Err(CoreError::UndeclaredReference {
            node: spec.logical_name.clone(),
            reference,
        }),
        None => Ok(()),
    }
}

fn validate_strategies(spec: &ResourceSpec) -> CoreResult<()> {
    if spec.strategies.is_empty() {
        return Err(CoreError::InvalidStrategy {
            node: spec.logical_name.clone(),
            message: "at least one match strategy is required".to_string(),
        });
    }

    let strongest_priority = spec
        .strategies
        .iter()
        .filter(|s| !s.weak)
        .map(|s| s.priority)
        .max();

    for (i, strategy) in spec.strategies.iter().enumerate() {
        if !strategy.weak {
            continue;
        }
        if i != spec.strategies.len() - 1 {
            return Err(CoreError::InvalidStrategy {
                node: spec.logical_name.clone(),
                message: format!("weak strategy '{}' must be declared last", strategy.label),
            });
        }
        if strongest_priority.map_or(false, |p| strategy.priority <= p) {
            return Err(CoreError::InvalidStrategy {
                node: spec.logical_name.clone(),
                message: format!("weak strategy '{}' must have the lowest priority", strategy.label),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MatchStrategy;
    use berth_provider::ResourceKind;

    fn spec(kind: ResourceKind, name: &str) -> ResourceSpec {
        ResourceSpec::new(kind, name).strategy(MatchStrategy::tag("Name", name))
    }

    #[test]
    fn test_catalog_builder() {
        let catalog = ResourceCatalog::builder("test")
            .resource(spec(ResourceKind::Subnet, "subnet").depends_on("network"))
            .resource(spec(ResourceKind::Network, "network"))
            .build()
            .unwrap();

        assert_eq!(catalog.name(), "test");
        assert_eq!(catalog.len(), 2);
        let ordered: Vec<&str> = catalog.ordered_specs().map(|s| s.logical_name.as_str()).collect();
        assert_eq!(ordered, vec!["network", "subnet"]);
        assert!(catalog.contains("subnet"));
        assert_eq!(catalog.get("network").map(|s| s.kind), Some(ResourceKind::Network));
    }

    #[test]
    fn test_strategies_sorted_by_priority() {
        let catalog = ResourceCatalog::builder("test")
            .resource(
                ResourceSpec::new(ResourceKind::Network, "network")
                    .strategy(MatchStrategy::attribute("cidr-block", "10.0.0.0/16").priority(2))
                    .strategy(MatchStrategy::tag("Name", "vpc").priority(1))
                    .strategy(MatchStrategy::flag("is-default", true).priority(2))
                    .strategy(MatchStrategy::any()),
            )
            .build()
            .unwrap();

        let labels: Vec<&str> = catalog.specs()[0].strategies.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["tag:Name=vpc", "cidr-block=10.0.0.0/16", "is-default=true", "any"]);
    }

    #[test]
    fn test_weak_strategy_must_be_last() {
        let result = ResourceCatalog::builder("test")
            .resource(
                ResourceSpec::new(ResourceKind::Network, "network")
                    .strategy(MatchStrategy::any())
                    .strategy(MatchStrategy::tag("Name", "vpc")),
            )
            .build();
        assert!(matches!(result, Err(CoreError::InvalidStrategy { .. })));
    }

    #[test]
    fn test_spec_without_strategies_rejected() {
        let result = ResourceCatalog::builder("test")
            .resource(ResourceSpec::new(ResourceKind::Network, "network"))
            .build();
        assert!(matches!(result, Err(CoreError::InvalidStrategy { .. })));
    }

    #[test]
    fn test_cycle_rejected_at_build_time() {
        let result = ResourceCatalog::builder("test")
            .resource(spec(ResourceKind::Network, "a").depends_on("b"))
            .resource(spec(ResourceKind::Network, "b").depends_on("a"))
            .build();
        assert!(matches!(result, Err(CoreError::CycleDetected(_))));
    }

    #[test]
    fn test_reference_requires_dependency() {
        let result = ResourceCatalog::builder("test")
            .resource(spec(ResourceKind::Network, "network"))
            .resource(
                spec(ResourceKind::SecurityGroup, "security-group:alb")
                    .attributes(serde_json::json!({"vpc_id": "{{network.id}}"})),
            )
            .build();
        assert!(matches!(
            result,
            Err(CoreError::UndeclaredReference { ref reference, .. }) if reference == "network"
        ));

        let result = ResourceCatalog::builder("test")
            .resource(spec(ResourceKind::Network, "network"))
            .resource(
                ResourceSpec::new(ResourceKind::Subnet, "subnet")
                    .strategy(MatchStrategy::tag("Name", "subnet").and(berth_provider::Filter::new("vpc-id", "{{network.id}}")))
                    .depends_on("network"),
            )
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_transitive_dependents() {
        let catalog = ResourceCatalog::builder("test")
            .resource(spec(ResourceKind::Network, "network"))
            .resource(spec(ResourceKind::Subnet, "subnet").depends_on("network"))
            .resource(spec(ResourceKind::NatGateway, "nat").depends_on("subnet"))
            .resource(spec(ResourceKind::RouteTable, "routes").depends_on("nat"))
            .resource(spec(ResourceKind::Cluster, "cluster"))
            .build()
            .unwrap();

        assert_eq!(catalog.transitive_dependents("subnet"), vec!["nat", "routes"]);
        assert!(catalog.transitive_dependents("cluster").is_empty());
    }
}
