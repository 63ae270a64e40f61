//! The output contract consumed by service deployment pipelines.

use berth_core::{EnvironmentConfig, OutputKey};

use crate::environment::{
    private_subnet, public_subnet, registry, ALB_SECURITY_GROUP, CLUSTER, EXECUTION_ROLE, HTTPS_LISTENER,
    HTTP_LISTENER, LOAD_BALANCER, LOG_GROUP, NETWORK, TASK_ROLE, WORKLOAD_SECURITY_GROUP,
};
use crate::profile::{CatalogProfile, NetworkMode};

/// Output keys of the container environment.
///
/// `subnet_ids` lists every subnet of the environment, public first.
pub fn standard_outputs(config: &EnvironmentConfig, profile: &CatalogProfile) -> Vec<OutputKey> {
    let mut keys = vec![
        OutputKey::attribute("cluster_name", CLUSTER, "name"),
        OutputKey::attribute("cluster_arn", CLUSTER, "arn"),
    ];

    for definition in &profile.registries {
        let logical = registry(&definition.name);
        keys.push(OutputKey::attribute(
            format!("{}_repo_url", definition.name),
            logical.clone(),
            "repository-url",
        ));
        keys.push(OutputKey::attribute(format!("{}_repo_name", definition.name), logical, "name"));
    }

    keys.extend([
        OutputKey::attribute("task_execution_role_arn", EXECUTION_ROLE, "arn"),
        OutputKey::attribute("task_role_arn", TASK_ROLE, "arn"),
        OutputKey::attribute("alb_dns_name", LOAD_BALANCER, "dns-name"),
        OutputKey::attribute("alb_arn", LOAD_BALANCER, "arn"),
        OutputKey::attribute("alb_zone_id", LOAD_BALANCER, "canonical-hosted-zone-id"),
        OutputKey::attribute("http_listener_arn", HTTP_LISTENER, "arn"),
    ]);
    if profile.https_enabled() {
        keys.push(OutputKey::attribute("https_listener_arn", HTTPS_LISTENER, "arn"));
    }

    let zones = 0..profile.availability_zones;
    let public: Vec<String> = zones.clone().map(public_subnet).collect();
    let mut all_subnets = public.clone();
    if profile.network_mode == NetworkMode::Managed {
        all_subnets.extend(zones.map(private_subnet));
    }

    keys.extend([
        OutputKey::attribute("alb_security_group_id", ALB_SECURITY_GROUP, "id"),
        OutputKey::attribute("ecs_security_group_id", WORKLOAD_SECURITY_GROUP, "id"),
        OutputKey::attribute("log_group_name", LOG_GROUP, "name"),
        OutputKey::list("subnet_ids", all_subnets.clone(), "id"),
        OutputKey::attribute("vpc_id", NETWORK, "id"),
        OutputKey::literal("region", config.region.clone()),
    ]);

    if profile.network_mode == NetworkMode::Managed {
        let private: Vec<String> = all_subnets[public.len()..].to_vec();
        keys.push(OutputKey::list("public_subnet_ids", public, "id"));
        keys.push(OutputKey::list("private_subnet_ids", private, "id"));
    }

    keys
}
