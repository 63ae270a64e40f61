//! Catalog profiles: the per-environment knobs of the container environment.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// Whether berth builds the network or adopts an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Create the VPC, subnets, gateways and route tables
    #[default]
    Managed,
    /// Discover an existing VPC and subnets; create nothing network-level
    Adopt,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Managed => "managed",
            NetworkMode::Adopt => "adopt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "managed" => Some(NetworkMode::Managed),
            "adopt" => Some(NetworkMode::Adopt),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An image registry to ensure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDefinition {
    /// Short name (`backend`); the repository is named `{project}-{name}`
    pub name: String,
    pub scan_on_push: bool,
    /// `MUTABLE` or `IMMUTABLE`
    pub tag_mutability: String,
}

impl RegistryDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scan_on_push: true,
            tag_mutability: "MUTABLE".to_string(),
        }
    }

    pub fn immutable(mut self) -> Self {
        self.tag_mutability = "IMMUTABLE".to_string();
        self
    }
}

/// Retention values accepted by the log service.
const RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922, 3288, 3653,
];

/// Per-environment parameters that shape the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogProfile {
    pub network_mode: NetworkMode,
    /// One public and one private subnet per zone
    pub availability_zones: usize,
    /// Enables HTTPS when set
    pub certificate_domain: Option<String>,
    pub registries: Vec<RegistryDefinition>,
    pub log_retention_days: u32,
    pub capacity_providers: Vec<String>,
    pub default_capacity_provider: String,
    pub container_insights: bool,
    pub health_check_path: String,
    pub health_check_matcher: String,
}

impl Default for CatalogProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl CatalogProfile {
    /// Managed network over two zones, backend and frontend registries.
    pub fn standard() -> Self {
        Self {
            network_mode: NetworkMode::Managed,
            availability_zones: 2,
            certificate_domain: None,
            registries: vec![RegistryDefinition::new("backend"), RegistryDefinition::new("frontend")],
            log_retention_days: 7,
            capacity_providers: vec!["FARGATE".to_string(), "FARGATE_SPOT".to_string()],
            default_capacity_provider: "FARGATE".to_string(),
            container_insights: true,
            health_check_path: "/".to_string(),
            health_check_matcher: "200-499".to_string(),
        }
    }

    /// Reuse an existing network (tagged, by CIDR, the default VPC, or the only one).
    pub fn adopt_existing() -> Self {
        Self {
            network_mode: NetworkMode::Adopt,
            ..Self::standard()
        }
    }

    /// Single registry, on-demand capacity only, no insights.
    pub fn minimal() -> Self {
        Self {
            registries: vec![RegistryDefinition::new("app")],
            log_retention_days: 1,
            capacity_providers: vec!["FARGATE".to_string()],
            container_insights: false,
            ..Self::standard()
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "adopt" | "adopt-existing" => Some(Self::adopt_existing()),
            "minimal" => Some(Self::minimal()),
            _ => None,
        }
    }

    pub fn with_certificate_domain(mut self, domain: impl Into<String>) -> Self {
        self.certificate_domain = Some(domain.into());
        self
    }

    pub fn with_network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = mode;
        self
    }

    pub fn with_availability_zones(mut self, zones: usize) -> Self {
        self.availability_zones = zones;
        self
    }

    pub fn with_registry(mut self, registry: RegistryDefinition) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn with_log_retention(mut self, days: u32) -> Self {
        self.log_retention_days = days;
        self
    }

    pub fn https_enabled(&self) -> bool {
        self.certificate_domain.is_some()
    }

    pub fn validate(&self) -> CatalogResult<()> {
        if self.availability_zones == 0 || self.availability_zones > 6 {
            return Err(CatalogError::InvalidProfile(format!(
                "availability_zones must be between 1 and 6, got {}",
                self.availability_zones
            )));
        }
        if !RETENTION_DAYS.contains(&self.log_retention_days) {
            return Err(CatalogError::InvalidProfile(format!(
                "log_retention_days {} is not a supported retention",
                self.log_retention_days
            )));
        }
        if !self.capacity_providers.contains(&self.default_capacity_provider) {
            return Err(CatalogError::InvalidProfile(format!(
                "default capacity provider {} is not among {:?}",
                self.default_capacity_provider, self.capacity_providers
            )));
        }
        let mut names: Vec<&str> = self.registries.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if names.iter().any(|n| n.is_empty()) {
            return Err(CatalogError::InvalidProfile("registry names must not be empty".to_string()));
        }
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(CatalogError::InvalidProfile(format!("duplicate registry '{}'", w[0])));
        }
        if self.certificate_domain.as_deref().map_or(false, |d| d.trim().is_empty()) {
            return Err(CatalogError::InvalidProfile("certificate_domain must not be empty".to_string()));
        }
        Ok(())
    }
}
