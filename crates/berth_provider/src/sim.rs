//! Simulated cloud provider.
//!
//! Provides an in-memory implementation of the [`CloudProvider`] port for
//! tests and for local runs of the CLI. State can optionally be persisted to
//! a JSON file so that successive runs observe the same "provider state".

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProviderError, ProviderResult};
use crate::kind::ResourceKind;
use crate::port::{CloudProvider, Filter, RemoteResource};

/// Port operation, used for fault injection and call capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Describe,
    Create,
    Tag,
    Poll,
}

/// A provider failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Throttle,
    Conflict,
    Transient,
    PermissionDenied,
    Validation,
    QuotaExceeded,
}

impl Fault {
    fn to_error(self, context: String) -> ProviderError {
        match self {
            Fault::Throttle => ProviderError::Throttled(context),
            Fault::Conflict => ProviderError::Conflict(context),
            Fault::Transient => ProviderError::Transient(context),
            Fault::PermissionDenied => ProviderError::PermissionDenied(context),
            Fault::Validation => ProviderError::Validation(context),
            Fault::QuotaExceeded => ProviderError::QuotaExceeded(context),
        }
    }
}

#[derive(Debug, Clone)]
struct FaultRule {
    operation: Operation,
    kind: Option<ResourceKind>,
    fault: Fault,
    /// `None` fails forever
    remaining: Option<usize>,
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub operation: Operation,
    pub kind: Option<ResourceKind>,
    pub id: Option<String>,
    pub filters: Vec<Filter>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResource {
    resource: RemoteResource,
    /// State the resource settles into once provisioning finishes
    ready_state: Option<String>,
    polls_remaining: u32,
}

/// Serializable provider state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudState {
    pub account_id: String,
    pub region: String,
    resources: Vec<StoredResource>,
}

impl Default for CloudState {
    fn default() -> Self {
        Self {
            account_id: "123456789012".to_string(),
            region: "us-east-1".to_string(),
            resources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct SimSettings {
    ready_after_polls: u32,
    never_ready: Vec<ResourceKind>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            ready_after_polls: 1,
            never_ready: Vec::new(),
        }
    }
}

/// In-memory cloud provider.
///
/// Asynchronous kinds (NAT gateways, load balancers, instances) are created in
/// a provisioning state and settle after a configurable number of polls.
/// Name uniqueness is enforced the way the real services do it, returning
/// [`ProviderError::AlreadyExists`].
#[derive(Clone)]
pub struct SimulatedCloud {
    state: Arc<RwLock<CloudState>>,
    settings: Arc<RwLock<SimSettings>>,
    faults: Arc<RwLock<Vec<FaultRule>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    state_file: Option<PathBuf>,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCloud {
    /// Create an empty simulated cloud.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CloudState::default())),
            settings: Arc::new(RwLock::new(SimSettings::default())),
            faults: Arc::new(RwLock::new(Vec::new())),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            state_file: None,
        }
    }

    /// Open a file-backed simulated cloud, starting empty if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            CloudState::default()
        };
        debug!("Opened simulated cloud state {:?}", path);

        let mut cloud = Self::new();
        cloud.state = Arc::new(RwLock::new(state));
        cloud.state_file = Some(path);
        Ok(cloud)
    }

    /// Write the state back to the backing file, if any.
    pub fn persist(&self) -> ProviderResult<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.state.read())?;
        fs::write(path, json)?;
        debug!("Saved simulated cloud state to {:?}", path);
        Ok(())
    }

    /// Set the region used for ARNs and DNS names.
    pub fn with_region(self, region: impl Into<String>) -> Self {
        self.state.write().region = region.into();
        self
    }

    /// Set the account id used for ARNs.
    pub fn with_account(self, account_id: impl Into<String>) -> Self {
        self.state.write().account_id = account_id.into();
        self
    }

    /// Number of polls before an asynchronous resource settles (0 = ready at creation).
    pub fn ready_after_polls(self, polls: u32) -> Self {
        self.settings.write().ready_after_polls = polls;
        self
    }

    /// Resources of this kind never leave their provisioning state.
    pub fn never_ready(self, kind: ResourceKind) -> Self {
        self.settings.write().never_ready.push(kind);
        self
    }

    /// Fail the next `times` calls of `operation` (optionally only for `kind`).
    pub fn inject_fault(
        self,
        operation: Operation,
        kind: Option<ResourceKind>,
        fault: Fault,
        times: usize,
    ) -> Self {
        self.faults.write().push(FaultRule {
            operation,
            kind,
            fault,
            remaining: Some(times),
        });
        self
    }

    /// Fail every call of `operation` (optionally only for `kind`).
    pub fn inject_persistent_fault(
        self,
        operation: Operation,
        kind: Option<ResourceKind>,
        fault: Fault,
    ) -> Self {
        self.faults.write().push(FaultRule {
            operation,
            kind,
            fault,
            remaining: None,
        });
        self
    }

    /// Add a pre-existing resource.
    pub fn seed(self, resource: RemoteResource) -> Self {
        self.insert(resource);
        self
    }

    /// Add a pre-existing resource without consuming the cloud.
    pub fn insert(&self, resource: RemoteResource) {
        self.state.write().resources.push(StoredResource {
            resource,
            ready_state: None,
            polls_remaining: 0,
        });
    }

    /// All resources of a kind, in creation order.
    pub fn resources(&self, kind: ResourceKind) -> Vec<RemoteResource> {
        self.state
            .read()
            .resources
            .iter()
            .filter(|r| r.resource.kind == kind)
            .map(|r| r.resource.clone())
            .collect()
    }

    /// Total number of stored resources.
    pub fn resource_count(&self) -> usize {
        self.state.read().resources.len()
    }

    pub fn region(&self) -> String {
        self.state.read().region.clone()
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.captured_calls.write().clear();
    }

    /// Number of calls of an operation.
    pub fn count(&self, operation: Operation) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Number of create calls for a kind.
    pub fn create_count(&self, kind: ResourceKind) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.operation == Operation::Create && c.kind == Some(kind))
            .count()
    }

    fn record_call(&self, call: CapturedCall) {
        self.captured_calls.write().push(call);
    }

    fn check_fault(&self, operation: Operation, kind: Option<ResourceKind>, context: &str) -> ProviderResult<()> {
        let mut faults = self.faults.write();
        let position = faults.iter().position(|rule| {
            rule.operation == operation
                && (rule.kind.is_none() || rule.kind == kind)
                && rule.remaining.map_or(true, |n| n > 0)
        });

        let Some(index) = position else {
            return Ok(());
        };
        let rule = &mut faults[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Err(rule.fault.to_error(format!("simulated fault on {:?} {}", operation, context)))
    }

    fn generate_id(kind: ResourceKind) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", kind.id_prefix(), &suffix[..17])
    }

    fn build_arn(state: &CloudState, kind: ResourceKind, name: &str) -> String {
        match kind {
            ResourceKind::Role => format!("arn:aws:iam::{}:role/{}", state.account_id, name),
            ResourceKind::LogGroup => format!(
                "arn:aws:logs:{}:{}:log-group:{}",
                state.region, state.account_id, name
            ),
            ResourceKind::Registry => format!(
                "arn:aws:ecr:{}:{}:repository/{}",
                state.region, state.account_id, name
            ),
            ResourceKind::LoadBalancer => format!(
                "arn:aws:elasticloadbalancing:{}:{}:loadbalancer/app/{}/{}",
                state.region,
                state.account_id,
                name,
                &Uuid::new_v4().simple().to_string()[..16]
            ),
            other => format!(
                "arn:aws:{}:{}:{}:{}/{}",
                other.service(),
                state.region,
                state.account_id,
                other.as_str(),
                name
            ),
        }
    }

    /// Attribute holding the unique name for kinds the provider keys by name.
    fn unique_name_key(kind: ResourceKind) -> Option<&'static str> {
        match kind {
            ResourceKind::SecurityGroup => Some("group-name"),
            ResourceKind::LoadBalancer
            | ResourceKind::TargetGroup
            | ResourceKind::Cluster
            | ResourceKind::Registry
            | ResourceKind::Role
            | ResourceKind::LogGroup
            | ResourceKind::KeyPair => Some("name"),
            _ => None,
        }
    }

    /// Initial and settled state for a freshly created resource.
    fn lifecycle(kind: ResourceKind) -> (&'static str, Option<&'static str>) {
        match kind {
            ResourceKind::NatGateway => ("pending", Some("available")),
            ResourceKind::LoadBalancer => ("provisioning", Some("active")),
            ResourceKind::Instance => ("pending", Some("running")),
            ResourceKind::Cluster => ("ACTIVE", None),
            _ => ("available", None),
        }
    }

    fn materialize(&self, kind: ResourceKind, payload: &Value) -> ProviderResult<StoredResource> {
        let fields = payload.as_object().ok_or_else(|| {
            ProviderError::Validation(format!("{} payload must be an object", kind))
        })?;

        if kind == ResourceKind::Certificate {
            return Err(ProviderError::Unsupported(
                "certificates must be requested and validated outside of provisioning".to_string(),
            ));
        }

        let mut attributes = BTreeMap::new();
        let mut tags = BTreeMap::new();
        for (key, value) in fields {
            if key == "tags" {
                if let Some(map) = value.as_object() {
                    for (k, v) in map {
                        if let Some(v) = v.as_str() {
                            tags.insert(k.clone(), v.to_string());
                        }
                    }
                }
                continue;
            }
            attributes.insert(key.replace('_', "-"), value.clone());
        }

        let state = self.state.read();

        if let Some(name_key) = Self::unique_name_key(kind) {
            let name = attributes
                .get(name_key)
                .and_then(|v| v.as_str())
                .ok_or_else(|| ProviderError::Validation(format!("{} requires '{}'", kind, name_key)))?;
            let vpc = attributes.get("vpc-id").cloned();
            let taken = state.resources.iter().any(|r| {
                r.resource.kind == kind
                    && r.resource.attributes.get(name_key).and_then(|v| v.as_str()) == Some(name)
                    && (kind != ResourceKind::SecurityGroup || r.resource.attributes.get("vpc-id") == vpc.as_ref())
            });
            if taken {
                return Err(ProviderError::AlreadyExists(format!("{} '{}'", kind, name)));
            }
        }

        let display_name = attributes
            .get("name")
            .or_else(|| attributes.get("group-name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let short_id = Self::generate_id(kind);
        let arn = kind
            .arn_identified()
            .then(|| Self::build_arn(&state, kind, display_name.as_deref().unwrap_or(&short_id)));
        let id = arn.clone().unwrap_or_else(|| short_id.clone());

        match kind {
            ResourceKind::Network => {
                attributes.insert("is-default".to_string(), Value::Bool(false));
            }
            ResourceKind::NatGateway | ResourceKind::Instance => {
                let octet = (Uuid::new_v4().as_u128() % 250) as u8 + 2;
                attributes.insert("public-ip".to_string(), Value::String(format!("54.0.0.{}", octet)));
            }
            ResourceKind::LoadBalancer => {
                let name = display_name.clone().unwrap_or_default();
                let number = Uuid::new_v4().as_u128() % 1_000_000_000;
                attributes.insert(
                    "dns-name".to_string(),
                    Value::String(format!("{}-{}.{}.elb.amazonaws.com", name, number, state.region)),
                );
                attributes.insert(
                    "canonical-hosted-zone-id".to_string(),
                    Value::String("Z35SXDOTRQ7X7K".to_string()),
                );
            }
            ResourceKind::Registry => {
                let name = display_name.clone().unwrap_or_default();
                attributes.insert(
                    "repository-url".to_string(),
                    Value::String(format!(
                        "{}.dkr.ecr.{}.amazonaws.com/{}",
                        state.account_id, state.region, name
                    )),
                );
            }
            _ => {}
        }

        let settings = self.settings.read();
        let (initial, settled) = Self::lifecycle(kind);
        let mut resource = RemoteResource::new(kind, id);
        resource.arn = arn;
        resource.attributes = attributes;
        resource.tags = tags;

        let (state_now, ready_state, polls_remaining) = match settled {
            Some(settled) if settings.ready_after_polls == 0 && !settings.never_ready.contains(&kind) => {
                (settled, None, 0)
            }
            Some(settled) => (initial, Some(settled.to_string()), settings.ready_after_polls),
            None => (initial, None, 0),
        };
        resource.state = Some(state_now.to_string());

        Ok(StoredResource {
            resource,
            ready_state,
            polls_remaining,
        })
    }
}

fn value_matches(value: &Value, candidates: &[String]) -> bool {
    match value {
        Value::String(s) => candidates.iter().any(|c| c == s),
        Value::Bool(b) => candidates.iter().any(|c| c == &b.to_string()),
        Value::Number(n) => candidates.iter().any(|c| c == &n.to_string()),
        Value::Array(items) => items.iter().any(|item| value_matches(item, candidates)),
        _ => false,
    }
}

fn matches_filter(resource: &RemoteResource, filter: &Filter) -> bool {
    if let Some(key) = filter.tag_key() {
        return resource
            .tags
            .get(key)
            .map_or(false, |v| filter.values.iter().any(|c| c == v));
    }
    resource
        .field(&filter.name)
        .map_or(false, |v| value_matches(&v, &filter.values))
}

#[async_trait]
impl CloudProvider for SimulatedCloud {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn describe(&self, kind: ResourceKind, filters: &[Filter]) -> ProviderResult<Vec<RemoteResource>> {
        self.record_call(CapturedCall {
            operation: Operation::Describe,
            kind: Some(kind),
            id: None,
            filters: filters.to_vec(),
            payload: None,
        });
        self.check_fault(Operation::Describe, Some(kind), kind.as_str())?;

        let found: Vec<RemoteResource> = self
            .state
            .read()
            .resources
            .iter()
            .map(|r| &r.resource)
            .filter(|r| r.kind == kind && filters.iter().all(|f| matches_filter(r, f)))
            .cloned()
            .collect();
        Ok(found)
    }

    async fn create(&self, kind: ResourceKind, payload: &Value) -> ProviderResult<RemoteResource> {
        self.record_call(CapturedCall {
            operation: Operation::Create,
            kind: Some(kind),
            id: None,
            filters: Vec::new(),
            payload: Some(payload.clone()),
        });
        self.check_fault(Operation::Create, Some(kind), kind.as_str())?;

        let stored = self.materialize(kind, payload)?;
        let resource = stored.resource.clone();
        self.state.write().resources.push(stored);
        debug!("Simulated create {} {}", kind, resource.id);
        Ok(resource)
    }

    async fn tag(&self, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        self.record_call(CapturedCall {
            operation: Operation::Tag,
            kind: None,
            id: Some(id.to_string()),
            filters: Vec::new(),
            payload: Some(Value::String(format!("{}={}", key, value))),
        });
        self.check_fault(Operation::Tag, None, id)?;

        let mut state = self.state.write();
        let stored = state
            .resources
            .iter_mut()
            .find(|r| r.resource.id == id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        stored.resource.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn poll(&self, kind: ResourceKind, id: &str) -> ProviderResult<RemoteResource> {
        self.record_call(CapturedCall {
            operation: Operation::Poll,
            kind: Some(kind),
            id: Some(id.to_string()),
            filters: Vec::new(),
            payload: None,
        });
        self.check_fault(Operation::Poll, Some(kind), id)?;

        let never_ready = self.settings.read().never_ready.contains(&kind);
        let mut state = self.state.write();
        let stored = state
            .resources
            .iter_mut()
            .find(|r| r.resource.kind == kind && r.resource.id == id)
            .ok_or_else(|| ProviderError::NotFound(format!("{} {}", kind, id)))?;

        if !never_ready {
            if let Some(ready_state) = stored.ready_state.clone() {
                stored.polls_remaining = stored.polls_remaining.saturating_sub(1);
                if stored.polls_remaining == 0 {
                    stored.resource.state = Some(ready_state);
                    stored.ready_state = None;
                }
            }
        }
        Ok(stored.resource.clone())
    }
}
