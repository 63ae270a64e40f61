//! Cloud provider capability port.
//!
//! The engine never talks to a concrete SDK. Everything it needs from a
//! provider is expressed by the four operations of [`CloudProvider`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderResult;
use crate::kind::ResourceKind;

/// A describe/list filter.
///
/// Names follow the provider's filter vocabulary: `tag:<Key>` matches a tag,
/// any other name matches an attribute (`vpc-id`, `cidr-block`, `is-default`).
/// A resource matches when the attribute equals any of `values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    pub fn any_of(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tag(key: impl AsRef<str>, value: impl Into<String>) -> Self {
        Self::new(format!("tag:{}", key.as_ref()), value)
    }

    /// Tag key when this is a `tag:<Key>` filter.
    pub fn tag_key(&self) -> Option<&str> {
        self.name.strip_prefix("tag:")
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.values.join("|"))
    }
}

/// A resource as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub kind: ResourceKind,
    /// Provider-assigned id (the ARN for ARN-identified kinds)
    pub id: String,
    pub arn: Option<String>,
    /// Lifecycle state (`pending`, `available`, `active`, ...)
    pub state: Option<String>,
    /// Named attributes (`vpc-id`, `dns-name`, ...)
    pub attributes: BTreeMap<String, Value>,
    pub tags: BTreeMap<String, String>,
}

impl RemoteResource {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            arn: None,
            state: None,
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_arn(mut self, arn: impl Into<String>) -> Self {
        self.arn = Some(arn.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Look up a field by name, including the well-known `id`, `arn` and `state`.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "arn" => self.arn.clone().map(Value::String),
            "state" => self.state.clone().map(Value::String),
            other => self.attributes.get(other).cloned(),
        }
    }

    /// The `Name` tag, if any.
    pub fn name_tag(&self) -> Option<&str> {
        self.tags.get("Name").map(|s| s.as_str())
    }
}

/// Cloud provider capability port.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// List resources of a kind matching all filters.
    async fn describe(&self, kind: ResourceKind, filters: &[Filter]) -> ProviderResult<Vec<RemoteResource>>;

    /// Create a resource from a provider-specific payload.
    async fn create(&self, kind: ResourceKind, payload: &Value) -> ProviderResult<RemoteResource>;

    /// Attach a tag to an existing resource.
    async fn tag(&self, id: &str, key: &str, value: &str) -> ProviderResult<()>;

    /// Read the current state of a single resource.
    async fn poll(&self, kind: ResourceKind, id: &str) -> ProviderResult<RemoteResource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_tag() {
        let filter = Filter::tag("Name", "shop-prod-vpc");
        assert_eq!(filter.name, "tag:Name");
        assert_eq!(filter.tag_key(), Some("Name"));
        assert_eq!(filter.to_string(), "tag:Name=shop-prod-vpc");
        assert_eq!(Filter::new("vpc-id", "vpc-1").tag_key(), None);
    }

    #[test]
    fn test_remote_resource_fields() {
        let resource = RemoteResource::new(ResourceKind::LoadBalancer, "arn:lb")
            .with_arn("arn:lb")
            .with_state("active")
            .with_attribute("dns-name", "lb.example.com")
            .with_tag("Name", "shop-prod-alb");

        assert_eq!(resource.field("id"), Some(Value::String("arn:lb".into())));
        assert_eq!(resource.field("state"), Some(Value::String("active".into())));
        assert_eq!(resource.field("dns-name"), Some(Value::String("lb.example.com".into())));
        assert_eq!(resource.field("zone"), None);
        assert_eq!(resource.name_tag(), Some("shop-prod-alb"));
    }
}
