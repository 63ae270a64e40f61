//! Environment configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::reconciler::ReconcilerSettings;
use crate::retry::RetryPolicy;
use crate::waiter::WaitSettings;

/// Longest prefix accepted for `base_cidr`.
const MAX_BASE_PREFIX: u8 = 16;

/// Parameters of one target environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub project: String,
    pub environment: String,
    pub region: String,
    /// Network CIDR; subnets are carved from it as /24s
    pub base_cidr: String,
    /// Name pattern with `{project}`, `{environment}` and `{kind}` placeholders
    pub naming_template: String,
    pub retry: RetryPolicy,
    pub wait: WaitSettings,
    pub max_concurrency: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            project: "auto-deploy".to_string(),
            environment: "prod".to_string(),
            region: "us-east-1".to_string(),
            base_cidr: "10.100.0.0/16".to_string(),
            naming_template: "{project}-{environment}-{kind}".to_string(),
            retry: RetryPolicy::default(),
            wait: WaitSettings::default(),
            max_concurrency: 1,
        }
    }
}

impl EnvironmentConfig {
    /// Load from a YAML (`.yaml`, `.yml`) or TOML (`.toml`) file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))?
            }
            other => {
                return Err(CoreError::Config(format!(
                    "unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.project.trim().is_empty() {
            return Err(CoreError::Config("project must not be empty".to_string()));
        }
        if self.environment.trim().is_empty() {
            return Err(CoreError::Config("environment must not be empty".to_string()));
        }
        if !self.naming_template.contains("{kind}") {
            return Err(CoreError::Config("naming_template must contain {kind}".to_string()));
        }
        self.cidr_prefix()?;
        Ok(())
    }

    /// Physical name of a resource, e.g. `auto-deploy-prod-vpc`.
    pub fn resource_name(&self, kind: &str) -> String {
        self.naming_template
            .replace("{project}", &self.project)
            .replace("{environment}", &self.environment)
            .replace("{kind}", kind)
    }

    /// First two octets of the base CIDR (`10.100`).
    ///
    /// Subnets are /24 blocks indexed in the third octet, so the base block
    /// must be a /16 or wider.
    fn cidr_prefix(&self) -> CoreResult<String> {
        let invalid = || CoreError::Config(format!("invalid base_cidr '{}'", self.base_cidr));
        let (address, length) = self.base_cidr.split_once('/').ok_or_else(invalid)?;
        let octets: Vec<&str> = address.split('.').collect();
        if octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
            return Err(invalid());
        }
        let length: u8 = length.parse().map_err(|_| invalid())?;
        if length > 32 {
            return Err(invalid());
        }
        if length > MAX_BASE_PREFIX {
            return Err(CoreError::Config(format!(
                "base_cidr '{}' is narrower than /{}; subnets would fall outside it",
                self.base_cidr, MAX_BASE_PREFIX
            )));
        }
        Ok(format!("{}.{}", octets[0], octets[1]))
    }

    /// The `index`-th /24 carved from the base CIDR.
    pub fn subnet_cidr(&self, index: u8) -> CoreResult<String> {
        Ok(format!("{}.{}.0/24", self.cidr_prefix()?, index))
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            retry: self.retry.clone(),
            wait: self.wait.clone(),
            max_concurrency: self.max_concurrency.max(1),
        }
    }
}
