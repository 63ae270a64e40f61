//! Resource kind definitions.

use serde::{Deserialize, Serialize};

/// Kinds of resources the provider port understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Network,
    Subnet,
    InternetGateway,
    NatGateway,
    RouteTable,
    SecurityGroup,
    Certificate,
    LoadBalancer,
    TargetGroup,
    Listener,
    Cluster,
    Registry,
    Role,
    LogGroup,
    KeyPair,
    Instance,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet-gateway",
            ResourceKind::NatGateway => "nat-gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::Certificate => "certificate",
            ResourceKind::LoadBalancer => "load-balancer",
            ResourceKind::TargetGroup => "target-group",
            ResourceKind::Listener => "listener",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Registry => "registry",
            ResourceKind::Role => "role",
            ResourceKind::LogGroup => "log-group",
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::Instance => "instance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.as_str() == s.to_lowercase())
    }

    pub fn all() -> Vec<Self> {
        vec![
            ResourceKind::Network,
            ResourceKind::Subnet,
            ResourceKind::InternetGateway,
            ResourceKind::NatGateway,
            ResourceKind::RouteTable,
            ResourceKind::SecurityGroup,
            ResourceKind::Certificate,
            ResourceKind::LoadBalancer,
            ResourceKind::TargetGroup,
            ResourceKind::Listener,
            ResourceKind::Cluster,
            ResourceKind::Registry,
            ResourceKind::Role,
            ResourceKind::LogGroup,
            ResourceKind::KeyPair,
            ResourceKind::Instance,
        ]
    }

    /// Short prefix used for provider-assigned ids (`vpc-0a1b...`).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Network => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "igw",
            ResourceKind::NatGateway => "nat",
            ResourceKind::RouteTable => "rtb",
            ResourceKind::SecurityGroup => "sg",
            ResourceKind::Certificate => "cert",
            ResourceKind::LoadBalancer => "lb",
            ResourceKind::TargetGroup => "tg",
            ResourceKind::Listener => "lsn",
            ResourceKind::Cluster => "cluster",
            ResourceKind::Registry => "repo",
            ResourceKind::Role => "role",
            ResourceKind::LogGroup => "lg",
            ResourceKind::KeyPair => "key",
            ResourceKind::Instance => "i",
        }
    }

    /// Service namespace used when building ARNs.
    pub fn service(&self) -> &'static str {
        match self {
            ResourceKind::Network
            | ResourceKind::Subnet
            | ResourceKind::InternetGateway
            | ResourceKind::NatGateway
            | ResourceKind::RouteTable
            | ResourceKind::SecurityGroup
            | ResourceKind::KeyPair
            | ResourceKind::Instance => "ec2",
            ResourceKind::Certificate => "acm",
            ResourceKind::LoadBalancer | ResourceKind::TargetGroup | ResourceKind::Listener => {
                "elasticloadbalancing"
            }
            ResourceKind::Cluster => "ecs",
            ResourceKind::Registry => "ecr",
            ResourceKind::Role => "iam",
            ResourceKind::LogGroup => "logs",
        }
    }

    /// Whether the provider identifies this kind by ARN rather than a short id.
    pub fn arn_identified(&self) -> bool {
        !matches!(self.service(), "ec2")
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_names() {
        for kind in ResourceKind::all() {
            assert_eq!(ResourceKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_str("LOAD-BALANCER"), Some(ResourceKind::LoadBalancer));
        assert_eq!(ResourceKind::from_str("bucket"), None);
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&ResourceKind::SecurityGroup).unwrap();
        assert_eq!(json, "\"security-group\"");
    }

    #[test]
    fn test_arn_identified() {
        assert!(ResourceKind::LoadBalancer.arn_identified());
        assert!(ResourceKind::Role.arn_identified());
        assert!(!ResourceKind::Network.arn_identified());
    }
}
