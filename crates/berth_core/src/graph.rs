//! Dependency graph over catalog entries.

use std::collections::{BTreeSet, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::resource::ResourceSpec;

/// Nodes are catalog entries by declaration index; edges point from a node to
/// the nodes it depends on.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate names and unknown dependencies.
    pub fn from_specs(specs: &[ResourceSpec]) -> CoreResult<Self> {
        let mut index = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.logical_name.clone(), i).is_some() {
                return Err(CoreError::DuplicateLogicalName(spec.logical_name.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); specs.len()];
        let mut dependents = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.depends_on {
                let &j = index.get(dep).ok_or_else(|| CoreError::UnknownDependency {
                    node: spec.logical_name.clone(),
                    dependency: dep.clone(),
                })?;
                if !dependencies[i].contains(&j) {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        Ok(Self {
            names: specs.iter().map(|s| s.logical_name.clone()).collect(),
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    pub fn dependents(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Topological order, ties broken by declaration order.
    pub fn topological_order(&self) -> CoreResult<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(|d| d.len()).collect();
        let mut ready: BTreeSet<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            return Err(CoreError::CycleDetected(self.find_cycle(&in_degree)));
        }
        Ok(order)
    }

    /// Walk dependency edges among unresolved nodes until one repeats.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.len()).find(|&i| in_degree[i] > 0) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.dependencies[current].iter().find(|&&d| in_degree[d] > 0) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|&i| self.names[i].clone()).collect();
                cycle.push(self.names[next].clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|&i| self.names[i].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_provider::ResourceKind;

    fn spec(name: &str, deps: &[&str]) -> ResourceSpec {
        deps.iter().fold(ResourceSpec::new(ResourceKind::Network, name), |s, d| s.depends_on(*d))
    }

    #[test]
    fn test_topological_order_is_stable() {
        let specs = vec![
            spec("listener", &["load-balancer", "target-group"]),
            spec("network", &[]),
            spec("cluster", &[]),
            spec("load-balancer", &["network"]),
            spec("target-group", &["network"]),
        ];
        let graph = DependencyGraph::from_specs(&specs).unwrap();
        let order: Vec<&str> = graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|i| specs[i].logical_name.as_str())
            .collect();

        assert_eq!(order, vec!["network", "cluster", "load-balancer", "target-group", "listener"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let specs = vec![spec("subnet", &["network"])];
        let err = DependencyGraph::from_specs(&specs).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDependency { ref dependency, .. } if dependency == "network"));
    }

    #[test]
    fn test_duplicate_name() {
        let specs = vec![spec("network", &[]), spec("network", &[])];
        assert!(matches!(
            DependencyGraph::from_specs(&specs),
            Err(CoreError::DuplicateLogicalName(_))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let specs = vec![spec("root", &[]), spec("a", &["c"]), spec("b", &["a"]), spec("c", &["b"])];
        let graph = DependencyGraph::from_specs(&specs).unwrap();
        match graph.topological_order() {
            Err(CoreError::CycleDetected(cycle)) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"root".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }
}
