//! The container environment topology.
//!
//! network → subnets → internet gateway / NAT gateway → route tables;
//! security groups → load balancer → listeners; cluster, registries, roles
//! and the log group are independent leaves.

use berth_core::{EnvironmentConfig, MatchStrategy, ReadinessCheck, ResourceCatalog, ResourceSpec};
use berth_provider::{Filter, ResourceKind};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::CatalogResult;
use crate::profile::{CatalogProfile, NetworkMode};

pub const NETWORK: &str = "network";
pub const INTERNET_GATEWAY: &str = "internet-gateway";
pub const NAT_GATEWAY: &str = "nat-gateway";
pub const PUBLIC_ROUTES: &str = "route-table:public";
pub const PRIVATE_ROUTES: &str = "route-table:private";
pub const ALB_SECURITY_GROUP: &str = "security-group:alb";
pub const WORKLOAD_SECURITY_GROUP: &str = "security-group:workload";
pub const CERTIFICATE: &str = "certificate";
pub const LOAD_BALANCER: &str = "load-balancer";
pub const TARGET_GROUP: &str = "target-group";
pub const HTTP_LISTENER: &str = "listener";
pub const HTTPS_LISTENER: &str = "listener:https";
pub const CLUSTER: &str = "cluster";
pub const EXECUTION_ROLE: &str = "role:execution";
pub const TASK_ROLE: &str = "role:task";
pub const LOG_GROUP: &str = "log-group";

pub fn public_subnet(index: usize) -> String {
    format!("subnet:public-{}", index)
}

pub fn private_subnet(index: usize) -> String {
    format!("subnet:private-{}", index)
}

pub fn registry(name: &str) -> String {
    format!("registry:{}", name)
}

/// Physical names derived from the environment config.
pub(crate) struct Naming<'a> {
    pub config: &'a EnvironmentConfig,
}

impl Naming<'_> {
    pub fn name(&self, kind: &str) -> String {
        self.config.resource_name(kind)
    }

    pub fn tags(&self, name: &str) -> Vec<(String, String)> {
        vec![
            ("Name".to_string(), name.to_string()),
            ("Environment".to_string(), self.config.environment.clone()),
            ("Project".to_string(), self.config.project.clone()),
            ("ManagedBy".to_string(), "berth".to_string()),
        ]
    }

    /// A spec discovered by its `Name` tag and tagged on creation.
    pub fn managed(&self, kind: ResourceKind, logical_name: &str, name: &str) -> ResourceSpec {
        ResourceSpec::new(kind, logical_name)
            .strategy(MatchStrategy::tag("Name", name))
            .tags(self.tags(name))
    }

    /// Like [`Naming::managed`], also matching an untagged resource by its unique name.
    pub fn named(&self, kind: ResourceKind, logical_name: &str, name: &str) -> ResourceSpec {
        self.managed(kind, logical_name, name)
            .strategy(MatchStrategy::attribute("name", name).priority(1))
    }
}

fn availability_zone(region: &str, index: usize) -> String {
    format!("{}{}", region, (b'a' + index as u8) as char)
}

fn trust_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"Service": service},
            "Action": "sts:AssumeRole"
        }]
    })
}

fn allow_policy(actions: &[&str]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": actions,
            "Resource": "*"
        }]
    })
}

/// Build the catalog of the container environment.
pub fn container_environment(config: &EnvironmentConfig, profile: &CatalogProfile) -> CatalogResult<ResourceCatalog> {
    config.validate()?;
    profile.validate()?;

    let naming = Naming { config };
    let mut specs = Vec::new();

    match profile.network_mode {
        NetworkMode::Managed => specs.extend(managed_network(&naming, profile)?),
        NetworkMode::Adopt => specs.extend(adopted_network(&naming, profile)),
    }
    specs.extend(security_groups(&naming));
    specs.extend(load_balancing(&naming, profile));
    specs.extend(platform(&naming, profile));

    let catalog = ResourceCatalog::builder(naming.name("environment"))
        .resources(specs)
        .build()?;
    debug!(
        "Container environment '{}' has {} resources ({} network)",
        catalog.name(),
        catalog.len(),
        profile.network_mode
    );
    Ok(catalog)
}

fn managed_network(naming: &Naming<'_>, profile: &CatalogProfile) -> CatalogResult<Vec<ResourceSpec>> {
    let config = naming.config;
    let vpc_name = naming.name("vpc");
    let mut specs = vec![naming
        .managed(ResourceKind::Network, NETWORK, &vpc_name)
        .strategy(MatchStrategy::attribute("cidr-block", config.base_cidr.clone()).priority(1))
        .attributes(json!({
            "cidr_block": config.base_cidr,
            "enable_dns_support": true,
            "enable_dns_hostnames": true
        }))];

    let igw_name = naming.name("igw");
    specs.push(
        naming
            .managed(ResourceKind::InternetGateway, INTERNET_GATEWAY, &igw_name)
            .strategy(MatchStrategy::attribute("vpc-id", "{{network.id}}").priority(1))
            .attributes(json!({"vpc_id": "{{network.id}}"}))
            .depends_on(NETWORK),
    );

    for i in 0..profile.availability_zones {
        let zone = availability_zone(&config.region, i);
        for (logical, name, cidr, public) in [
            (public_subnet(i), naming.name(&format!("public-{}", i)), config.subnet_cidr(i as u8)?, true),
            (
                private_subnet(i),
                naming.name(&format!("private-{}", i)),
                config.subnet_cidr(100 + i as u8)?,
                false,
            ),
        ] {
            specs.push(
                ResourceSpec::new(ResourceKind::Subnet, logical)
                    .strategy(MatchStrategy::tag("Name", name.clone()).and(Filter::new("vpc-id", "{{network.id}}")))
                    .strategy(
                        MatchStrategy::attribute("cidr-block", cidr.clone())
                            .and(Filter::new("vpc-id", "{{network.id}}"))
                            .priority(1),
                    )
                    .attributes(json!({
                        "vpc_id": "{{network.id}}",
                        "cidr_block": cidr,
                        "availability_zone": zone,
                        "map_public_ip_on_launch": public
                    }))
                    .depends_on(NETWORK)
                    .tags(naming.tags(&name))
                    .tag("Type", if public { "public" } else { "private" }),
            );
        }
    }

    let nat_name = naming.name("nat");
    specs.push(
        naming
            .managed(ResourceKind::NatGateway, NAT_GATEWAY, &nat_name)
            .and_strategy_filter(Filter::any_of("state", ["pending", "available"]))
            .strategy(
                MatchStrategy::attribute("subnet-id", format!("{{{{{}.id}}}}", public_subnet(0)))
                    .and(Filter::any_of("state", ["pending", "available"]))
                    .priority(1),
            )
            .attributes(json!({
                "subnet_id": format!("{{{{{}.id}}}}", public_subnet(0)),
                "allocate_elastic_ip": true
            }))
            .depends_on(public_subnet(0))
            .ready_when(ReadinessCheck::state(["available"])),
    );

    let zones = 0..profile.availability_zones;
    let public_ids: Vec<String> = zones.clone().map(|i| format!("{{{{{}.id}}}}", public_subnet(i))).collect();
    let private_ids: Vec<String> = zones.clone().map(|i| format!("{{{{{}.id}}}}", private_subnet(i))).collect();

    let public_rt_name = naming.name("public-rt");
    specs.push(
        naming
            .managed(ResourceKind::RouteTable, PUBLIC_ROUTES, &public_rt_name)
            .strategy(associated_with(&public_subnet(0)))
            .attributes(json!({
                "vpc_id": "{{network.id}}",
                "routes": [{"destination_cidr_block": "0.0.0.0/0", "gateway_id": "{{internet-gateway.id}}"}],
                "subnet_associations": public_ids
            }))
            .depends_on(NETWORK)
            .depends_on(INTERNET_GATEWAY)
            .depends_all(zones.clone().map(public_subnet)),
    );

    let private_rt_name = naming.name("private-rt");
    specs.push(
        naming
            .managed(ResourceKind::RouteTable, PRIVATE_ROUTES, &private_rt_name)
            .strategy(associated_with(&private_subnet(0)))
            .attributes(json!({
                "vpc_id": "{{network.id}}",
                "routes": [{"destination_cidr_block": "0.0.0.0/0", "nat_gateway_id": "{{nat-gateway.id}}"}],
                "subnet_associations": private_ids
            }))
            .depends_on(NETWORK)
            .depends_on(NAT_GATEWAY)
            .depends_all(zones.map(private_subnet)),
    );

    Ok(specs)
}

/// Finds a route table by the first subnet it serves.
fn associated_with(subnet: &str) -> MatchStrategy {
    MatchStrategy::attribute("subnet-associations", format!("{{{{{}.id}}}}", subnet))
        .and(Filter::new("vpc-id", "{{network.id}}"))
        .priority(1)
}

fn adopted_network(naming: &Naming<'_>, profile: &CatalogProfile) -> Vec<ResourceSpec> {
    let config = naming.config;
    let mut specs = vec![ResourceSpec::new(ResourceKind::Network, NETWORK)
        .strategy(MatchStrategy::tag("Name", naming.name("vpc")))
        .strategy(MatchStrategy::attribute("cidr-block", config.base_cidr.clone()).priority(1))
        .strategy(MatchStrategy::flag("is-default", true).priority(2))
        .strategy(MatchStrategy::any())
        .external()];

    for i in 0..profile.availability_zones {
        specs.push(
            ResourceSpec::new(ResourceKind::Subnet, public_subnet(i))
                .strategy(
                    MatchStrategy::tag("Name", naming.name(&format!("public-{}", i)))
                        .and(Filter::new("vpc-id", "{{network.id}}")),
                )
                .strategy(
                    MatchStrategy::attribute("availability-zone", availability_zone(&config.region, i))
                        .and(Filter::new("vpc-id", "{{network.id}}"))
                        .and(Filter::new("default-for-az", "true"))
                        .priority(1),
                )
                .depends_on(NETWORK)
                .external(),
        );
    }
    specs
}

fn security_groups(naming: &Naming<'_>) -> Vec<ResourceSpec> {
    let alb_name = naming.name("alb-sg");
    let workload_name = naming.name("ecs-sg");
    let by_group = |name: &str| {
        MatchStrategy::attribute("group-name", name.to_string()).and(Filter::new("vpc-id", "{{network.id}}"))
    };

    vec![
        ResourceSpec::new(ResourceKind::SecurityGroup, ALB_SECURITY_GROUP)
            .strategy(by_group(&alb_name))
            .attributes(json!({
                "group_name": alb_name,
                "description": "Load balancer ingress",
                "vpc_id": "{{network.id}}",
                "ingress": [
                    {"protocol": "tcp", "from_port": 80, "to_port": 80, "cidr_blocks": ["0.0.0.0/0"]},
                    {"protocol": "tcp", "from_port": 443, "to_port": 443, "cidr_blocks": ["0.0.0.0/0"]}
                ],
                "egress": [{"protocol": "-1", "from_port": 0, "to_port": 0, "cidr_blocks": ["0.0.0.0/0"]}]
            }))
            .depends_on(NETWORK)
            .tags(naming.tags(&alb_name)),
        ResourceSpec::new(ResourceKind::SecurityGroup, WORKLOAD_SECURITY_GROUP)
            .strategy(by_group(&workload_name))
            .attributes(json!({
                "group_name": workload_name,
                "description": "Container tasks, reachable from the load balancer",
                "vpc_id": "{{network.id}}",
                "ingress": [
                    {"protocol": "tcp", "from_port": 0, "to_port": 65535, "source_security_group_id": "{{security-group:alb.id}}"}
                ],
                "egress": [{"protocol": "-1", "from_port": 0, "to_port": 0, "cidr_blocks": ["0.0.0.0/0"]}]
            }))
            .depends_on(NETWORK)
            .depends_on(ALB_SECURITY_GROUP)
            .tags(naming.tags(&workload_name)),
    ]
}

fn load_balancing(naming: &Naming<'_>, profile: &CatalogProfile) -> Vec<ResourceSpec> {
    let mut specs = Vec::new();
    let zones = 0..profile.availability_zones;

    let lb_name = naming.name("alb");
    let subnet_ids: Vec<String> = zones.clone().map(|i| format!("{{{{{}.id}}}}", public_subnet(i))).collect();
    specs.push(
        naming
            .named(ResourceKind::LoadBalancer, LOAD_BALANCER, &lb_name)
            .attributes(json!({
                "name": lb_name,
                "type": "application",
                "scheme": "internet-facing",
                "subnets": subnet_ids,
                "security_groups": ["{{security-group:alb.id}}"]
            }))
            .depends_all(zones.map(public_subnet))
            .depends_on(ALB_SECURITY_GROUP)
            .ready_when(ReadinessCheck::state(["active"])),
    );

    let tg_name = naming.name("default-tg");
    specs.push(
        naming
            .named(ResourceKind::TargetGroup, TARGET_GROUP, &tg_name)
            .attributes(json!({
                "name": tg_name,
                "port": 80,
                "protocol": "HTTP",
                "target_type": "ip",
                "vpc_id": "{{network.id}}",
                "health_check": {
                    "path": profile.health_check_path,
                    "matcher": profile.health_check_matcher,
                    "interval_seconds": 30,
                    "healthy_threshold": 2,
                    "unhealthy_threshold": 3
                }
            }))
            .depends_on(NETWORK),
    );

    let listener_on = |port: u16| {
        MatchStrategy::attribute("load-balancer-arn", "{{load-balancer.arn}}").and(Filter::new("port", port.to_string()))
    };
    let forward = json!({"type": "forward", "target_group_arn": "{{target-group.arn}}"});

    match &profile.certificate_domain {
        Some(domain) => {
            specs.push(
                ResourceSpec::new(ResourceKind::Certificate, CERTIFICATE)
                    .strategy(
                        MatchStrategy::attribute("domain-name", domain.clone()).and(Filter::new("status", "ISSUED")),
                    )
                    .external(),
            );
            specs.push(
                ResourceSpec::new(ResourceKind::Listener, HTTP_LISTENER)
                    .strategy(listener_on(80))
                    .attributes(json!({
                        "load_balancer_arn": "{{load-balancer.arn}}",
                        "protocol": "HTTP",
                        "port": 80,
                        "default_action": {
                            "type": "redirect",
                            "redirect": {"protocol": "HTTPS", "port": "443", "status_code": "HTTP_301"}
                        }
                    }))
                    .depends_on(LOAD_BALANCER)
                    .depends_on(HTTPS_LISTENER)
                    .tags(naming.tags(&naming.name("http-listener"))),
            );
            specs.push(
                ResourceSpec::new(ResourceKind::Listener, HTTPS_LISTENER)
                    .strategy(listener_on(443))
                    .attributes(json!({
                        "load_balancer_arn": "{{load-balancer.arn}}",
                        "protocol": "HTTPS",
                        "port": 443,
                        "certificate_arn": "{{certificate.arn}}",
                        "default_action": forward
                    }))
                    .depends_on(LOAD_BALANCER)
                    .depends_on(TARGET_GROUP)
                    .depends_on(CERTIFICATE)
                    .tags(naming.tags(&naming.name("https-listener"))),
            );
        }
        None => {
            specs.push(
                ResourceSpec::new(ResourceKind::Listener, HTTP_LISTENER)
                    .strategy(listener_on(80))
                    .attributes(json!({
                        "load_balancer_arn": "{{load-balancer.arn}}",
                        "protocol": "HTTP",
                        "port": 80,
                        "default_action": forward
                    }))
                    .depends_on(LOAD_BALANCER)
                    .depends_on(TARGET_GROUP)
                    .tags(naming.tags(&naming.name("http-listener"))),
            );
        }
    }
    specs
}

fn platform(naming: &Naming<'_>, profile: &CatalogProfile) -> Vec<ResourceSpec> {
    let config = naming.config;
    let mut specs = Vec::new();

    let cluster_name = naming.name("cluster");
    specs.push(naming.named(ResourceKind::Cluster, CLUSTER, &cluster_name).attributes(json!({
        "name": cluster_name,
        "capacity_providers": profile.capacity_providers,
        "default_capacity_provider_strategy": [
            {"capacity_provider": profile.default_capacity_provider, "weight": 1, "base": 1}
        ],
        "settings": [{
            "name": "containerInsights",
            "value": if profile.container_insights { "enabled" } else { "disabled" }
        }]
    })));

    for definition in &profile.registries {
        let repo_name = format!("{}-{}", config.project, definition.name);
        specs.push(
            naming
                .named(ResourceKind::Registry, &registry(&definition.name), &repo_name)
                .attributes(json!({
                    "name": repo_name,
                    "image_scanning_configuration": {"scan_on_push": definition.scan_on_push},
                    "image_tag_mutability": definition.tag_mutability
                })),
        );
    }

    let execution_name = naming.name("ecs-execution-role");
    specs.push(
        naming
            .named(ResourceKind::Role, EXECUTION_ROLE, &execution_name)
            .attributes(json!({
                "name": execution_name,
                "assume_role_policy": trust_policy("ecs-tasks.amazonaws.com"),
                "managed_policy_arns": [
                    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy",
                    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly"
                ],
                "inline_policies": {
                    "ssm-secrets": allow_policy(&[
                        "ssm:GetParameters",
                        "ssm:GetParameter",
                        "secretsmanager:GetSecretValue",
                        "kms:Decrypt"
                    ])
                }
            })),
    );

    let task_name = naming.name("ecs-task-role");
    specs.push(naming.named(ResourceKind::Role, TASK_ROLE, &task_name).attributes(json!({
        "name": task_name,
        "assume_role_policy": trust_policy("ecs-tasks.amazonaws.com"),
        "managed_policy_arns": ["arn:aws:iam::aws:policy/AmazonSSMReadOnlyAccess"],
        "inline_policies": {
            "task-permissions": allow_policy(&["ssm:GetParameters", "ssm:GetParameter", "dynamodb:*", "s3:*"])
        }
    })));

    let log_group_name = format!("/ecs/{}-{}", config.project, config.environment);
    specs.push(
        naming
            .named(ResourceKind::LogGroup, LOG_GROUP, &log_group_name)
            .attributes(json!({
                "name": log_group_name,
                "retention_in_days": profile.log_retention_days
            })),
    );

    specs
}

/// Small helpers local to this topology.
trait SpecExt {
    fn depends_all(self, names: impl IntoIterator<Item = String>) -> Self;
    fn and_strategy_filter(self, filter: Filter) -> Self;
}

impl SpecExt for ResourceSpec {
    fn depends_all(self, names: impl IntoIterator<Item = String>) -> Self {
        names.into_iter().fold(self, |spec, name| spec.depends_on(name))
    }

    /// Narrow the first strategy.
    fn and_strategy_filter(mut self, filter: Filter) -> Self {
        if let Some(first) = self.strategies.first_mut() {
            *first = first.clone().and(filter);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnvironmentConfig {
        EnvironmentConfig {
            project: "shop".into(),
            environment: "prod".into(),
            ..Default::default()
        }
    }

    fn names(catalog: &ResourceCatalog) -> Vec<&str> {
        catalog.ordered_specs().map(|s| s.logical_name.as_str()).collect()
    }

    #[test]
    fn test_standard_topology() {
        let catalog = container_environment(&config(), &CatalogProfile::standard()).unwrap();
        let order = names(&catalog);

        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos(NETWORK) < pos(&public_subnet(0)));
        assert!(pos(&public_subnet(0)) < pos(NAT_GATEWAY));
        assert!(pos(NAT_GATEWAY) < pos(PRIVATE_ROUTES));
        assert!(pos(ALB_SECURITY_GROUP) < pos(WORKLOAD_SECURITY_GROUP));
        assert!(pos(LOAD_BALANCER) < pos(HTTP_LISTENER));
        assert!(!catalog.contains(CERTIFICATE));
        assert!(!catalog.contains(HTTPS_LISTENER));
        assert!(catalog.contains(&registry("backend")));
        assert!(catalog.contains(&registry("frontend")));

        // 1 vpc + igw + 4 subnets + nat + 2 route tables + 2 sgs + lb + tg + listener
        // + cluster + 2 registries + 2 roles + log group
        assert_eq!(catalog.len(), 20);
    }

    #[test]
    fn test_naming_and_tags() {
        let catalog = container_environment(&config(), &CatalogProfile::standard()).unwrap();
        let network = catalog.get(NETWORK).unwrap();
        assert_eq!(network.strategies[0].label, "tag:Name=shop-prod-vpc");
        assert_eq!(network.tags.get("ManagedBy").map(String::as_str), Some("berth"));
        assert_eq!(network.tags.get("Environment").map(String::as_str), Some("prod"));

        let private = catalog.get(&private_subnet(1)).unwrap();
        assert_eq!(private.desired_attributes["cidr_block"], json!("10.100.101.0/24"));
        assert_eq!(private.desired_attributes["availability_zone"], json!("us-east-1b"));

        let log_group = catalog.get(LOG_GROUP).unwrap();
        assert_eq!(log_group.desired_attributes["name"], json!("/ecs/shop-prod"));
        assert_eq!(log_group.desired_attributes["retention_in_days"], json!(7));
    }

    #[test]
    fn test_every_managed_resource_is_tagged() {
        let profile = CatalogProfile::standard().with_certificate_domain("shop.example.com");
        let catalog = container_environment(&config(), &profile).unwrap();
        for spec in catalog.specs().iter().filter(|s| !s.is_external()) {
            for key in ["Name", "Environment", "Project", "ManagedBy"] {
                assert!(spec.tags.contains_key(key), "{} lacks {}", spec.logical_name, key);
            }
        }
    }

    #[test]
    fn test_https_profile() {
        let profile = CatalogProfile::standard().with_certificate_domain("shop.example.com");
        let catalog = container_environment(&config(), &profile).unwrap();

        let certificate = catalog.get(CERTIFICATE).unwrap();
        assert!(certificate.is_external());
        let https = catalog.get(HTTPS_LISTENER).unwrap();
        assert!(https.depends_on.contains(&CERTIFICATE.to_string()));

        let http = catalog.get(HTTP_LISTENER).unwrap();
        assert_eq!(http.desired_attributes["default_action"]["type"], json!("redirect"));
        assert!(!http.depends_on.contains(&CERTIFICATE.to_string()));
        assert!(http.depends_on.contains(&HTTPS_LISTENER.to_string()));

        let order: Vec<&str> = catalog.ordered_specs().map(|s| s.logical_name.as_str()).collect();
        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
        assert!(position(HTTPS_LISTENER) < position(HTTP_LISTENER));
    }

    #[test]
    fn test_untagged_network_resources_have_attribute_fallbacks() {
        let catalog = container_environment(&config(), &CatalogProfile::standard()).unwrap();
        let names = [
            public_subnet(0),
            private_subnet(1),
            NAT_GATEWAY.to_string(),
            PUBLIC_ROUTES.to_string(),
            PRIVATE_ROUTES.to_string(),
        ];
        for name in names {
            let spec = catalog.get(&name).unwrap();
            assert!(spec.strategies.len() >= 2, "{} has only {:?}", name, spec.strategies);
            assert!(
                spec.strategies.iter().any(|s| !s.label.starts_with("tag:")),
                "{} is only discoverable by tag",
                name
            );
        }
        let private_routes = catalog.get(PRIVATE_ROUTES).unwrap();
        assert!(private_routes.strategies[1].label.starts_with("subnet-associations={{subnet:private-0.id}}"));
    }

    #[test]
    fn test_adopt_profile() {
        let catalog = container_environment(&config(), &CatalogProfile::adopt_existing()).unwrap();
        let network = catalog.get(NETWORK).unwrap();
        assert!(network.is_external());
        assert!(network.strategies.last().unwrap().weak);
        assert!(!catalog.contains(NAT_GATEWAY));
        assert!(!catalog.contains(&private_subnet(0)));
        assert!(catalog.get(&public_subnet(1)).unwrap().is_external());
    }
}
