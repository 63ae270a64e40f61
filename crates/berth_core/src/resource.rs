//! Resource specifications and handles.
//!
//! A [`ResourceSpec`] declares one resource the environment must contain:
//! how to find it ([`MatchStrategy`]), how to create it (desired attributes)
//! and what it depends on. A [`ResourceHandle`] is what the reconciler records
//! once the resource has been discovered or created.

use std::collections::BTreeMap;

use berth_provider::{Filter, RemoteResource, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a spec may be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioning {
    /// Discover, or create when nothing matches
    #[default]
    Managed,
    /// Discover only; the resource is created outside of berth
    External,
}

/// A predicate plus a priority, used to locate an existing resource.
///
/// The predicate is a conjunction of provider filters. Filter values may
/// reference dependency handles (`{{network.id}}`); they are rendered before
/// the strategy runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStrategy {
    pub label: String,
    pub priority: u32,
    pub filters: Vec<Filter>,
    /// Matches any resource of the kind; only valid as the last strategy
    #[serde(default)]
    pub weak: bool,
}

impl MatchStrategy {
    fn with_filter(label: String, filter: Filter) -> Self {
        Self {
            label,
            priority: 0,
            filters: vec![filter],
            weak: false,
        }
    }

    /// Match on a tag value.
    pub fn tag(key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let value = value.into();
        let label = format!("tag:{}={}", key.as_ref(), value);
        Self::with_filter(label, Filter::tag(key, value))
    }

    /// Match on an attribute value.
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        let filter = Filter::new(name, value);
        Self::with_filter(filter.to_string(), filter)
    }

    /// Match on a boolean flag such as `is-default`.
    pub fn flag(name: impl Into<String>, value: bool) -> Self {
        let filter = Filter::new(name, value.to_string());
        Self::with_filter(filter.to_string(), filter)
    }

    /// Any resource of this kind. Deliberately weak.
    pub fn any() -> Self {
        Self {
            label: "any".to_string(),
            priority: u32::MAX,
            filters: Vec::new(),
            weak: true,
        }
    }

    /// Narrow the strategy with an additional filter.
    pub fn and(mut self, filter: Filter) -> Self {
        self.label = format!("{},{}", self.label, filter);
        self.filters.push(filter);
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Declares an asynchronously provisioned resource and when it counts as ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessCheck {
    /// Field to inspect (`state` for most kinds)
    pub field: String,
    /// Values that mean ready
    pub ready: Vec<String>,
}

impl ReadinessCheck {
    pub fn state(ready: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            field: "state".to_string(),
            ready: ready.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate against the provider's current view of the resource.
    pub fn is_ready(&self, resource: &RemoteResource) -> bool {
        match resource.field(&self.field) {
            Some(Value::String(s)) => self.ready.iter().any(|r| r.eq_ignore_ascii_case(&s)),
            Some(Value::Bool(b)) => self.ready.iter().any(|r| r == &b.to_string()),
            _ => false,
        }
    }
}

/// Declarative description of one resource to ensure exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub logical_name: String,
    pub strategies: Vec<MatchStrategy>,
    /// Provider-specific creation payload, may contain `{{name.attr}}` references
    pub desired_attributes: Value,
    pub depends_on: Vec<String>,
    /// Applied through the tag port right after creation
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub provisioning: Provisioning,
    pub readiness: Option<ReadinessCheck>,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, logical_name: impl Into<String>) -> Self {
        Self {
            kind,
            logical_name: logical_name.into(),
            strategies: Vec::new(),
            desired_attributes: Value::Object(Default::default()),
            depends_on: Vec::new(),
            tags: BTreeMap::new(),
            provisioning: Provisioning::default(),
            readiness: None,
        }
    }

    pub fn strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn attributes(mut self, attributes: Value) -> Self {
        self.desired_attributes = attributes;
        self
    }

    pub fn depends_on(mut self, logical_name: impl Into<String>) -> Self {
        self.depends_on.push(logical_name.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = (String, String)>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn external(mut self) -> Self {
        self.provisioning = Provisioning::External;
        self
    }

    pub fn ready_when(mut self, check: ReadinessCheck) -> Self {
        self.readiness = Some(check);
        self
    }

    pub fn is_external(&self) -> bool {
        self.provisioning == Provisioning::External
    }
}

/// Whether a handle was found or made by this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Discovered,
    Created,
}

/// Live identifier and attributes of a reconciled resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub logical_name: String,
    pub id: String,
    pub arn: Option<String>,
    pub attributes: BTreeMap<String, Value>,
    pub origin: Origin,
}

impl ResourceHandle {
    /// Adapt a provider resource into a handle.
    ///
    /// `id`, `arn`, `state` and every tag (as `tag:<Key>`) are folded into
    /// the attribute map so references can address them uniformly.
    pub fn from_remote(logical_name: impl Into<String>, resource: &RemoteResource, origin: Origin) -> Self {
        let mut attributes = resource.attributes.clone();
        attributes.insert("id".to_string(), Value::String(resource.id.clone()));
        if let Some(arn) = &resource.arn {
            attributes.insert("arn".to_string(), Value::String(arn.clone()));
        }
        if let Some(state) = &resource.state {
            attributes.insert("state".to_string(), Value::String(state.clone()));
        }
        for (key, value) in &resource.tags {
            attributes.insert(format!("tag:{}", key), Value::String(value.clone()));
        }

        Self {
            kind: resource.kind,
            logical_name: logical_name.into(),
            id: resource.id.clone(),
            arn: resource.arn.clone(),
            attributes,
            origin,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute rendered as a string, when it is scalar.
    pub fn attribute_str(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strategy_builders() {
        let tag = MatchStrategy::tag("Name", "shop-prod-vpc");
        assert_eq!(tag.label, "tag:Name=shop-prod-vpc");
        assert_eq!(tag.filters, vec![Filter::tag("Name", "shop-prod-vpc")]);
        assert!(!tag.weak);

        let scoped = MatchStrategy::attribute("group-name", "alb-sg").and(Filter::new("vpc-id", "{{network.id}}"));
        assert_eq!(scoped.filters.len(), 2);
        assert_eq!(scoped.label, "group-name=alb-sg,vpc-id={{network.id}}");

        let flag = MatchStrategy::flag("is-default", true);
        assert_eq!(flag.filters[0].values, vec!["true".to_string()]);

        let any = MatchStrategy::any();
        assert!(any.weak);
        assert!(any.filters.is_empty());
    }

    #[test]
    fn test_readiness_check() {
        let check = ReadinessCheck::state(["available"]);
        let pending = RemoteResource::new(ResourceKind::NatGateway, "nat-1").with_state("pending");
        let ready = RemoteResource::new(ResourceKind::NatGateway, "nat-1").with_state("available");
        assert!(!check.is_ready(&pending));
        assert!(check.is_ready(&ready));
        assert!(!check.is_ready(&RemoteResource::new(ResourceKind::NatGateway, "nat-1")));
    }

    #[test]
    fn test_handle_from_remote() {
        let remote = RemoteResource::new(ResourceKind::LoadBalancer, "arn:lb")
            .with_arn("arn:lb")
            .with_state("active")
            .with_attribute("dns-name", "alb.example.com")
            .with_attribute("port", 443)
            .with_tag("Name", "shop-prod-alb");

        let handle = ResourceHandle::from_remote("load-balancer", &remote, Origin::Created);
        assert_eq!(handle.id, "arn:lb");
        assert_eq!(handle.attribute_str("arn").as_deref(), Some("arn:lb"));
        assert_eq!(handle.attribute_str("dns-name").as_deref(), Some("alb.example.com"));
        assert_eq!(handle.attribute_str("port").as_deref(), Some("443"));
        assert_eq!(handle.attribute("tag:Name"), Some(&json!("shop-prod-alb")));
        assert_eq!(handle.origin, Origin::Created);
    }

    #[test]
    fn test_spec_builder() {
        let spec = ResourceSpec::new(ResourceKind::Certificate, "certificate")
            .strategy(MatchStrategy::attribute("domain-name", "example.com"))
            .tag("Name", "cert")
            .external();
        assert!(spec.is_external());
        assert!(spec.depends_on.is_empty());
        assert_eq!(spec.tags.get("Name").map(|s| s.as_str()), Some("cert"));
    }
}
