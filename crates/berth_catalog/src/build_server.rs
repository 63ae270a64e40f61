//! Build-server bootstrap.
//!
//! A small catalog launched into an existing environment. It only reads the
//! exported output map, never the environment catalog itself.

use std::collections::BTreeMap;

use berth_core::{MatchStrategy, OutputKey, ReadinessCheck, ResourceCatalog, ResourceSpec};
use berth_provider::{Filter, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CatalogError, CatalogResult};

pub const BUILD_SERVER_SECURITY_GROUP: &str = "security-group:build-server";
pub const KEY_PAIR: &str = "key-pair";
pub const INSTANCE: &str = "instance";

const DEFAULT_USER_DATA: &str = r#"#!/bin/bash
dd if=/dev/zero of=/swapfile bs=128M count=16
chmod 600 /swapfile
mkswap /swapfile
swapon /swapfile
echo "/swapfile swap swap defaults 0 0" >> /etc/fstab

yum update -y
wget -O /etc/yum.repos.d/jenkins.repo https://pkg.jenkins.io/redhat-stable/jenkins.repo
rpm --import https://pkg.jenkins.io/redhat-stable/jenkins.io-2023.key
dnf install java-17-amazon-corretto -y
yum install jenkins git docker -y
systemctl enable --now jenkins docker
usermod -a -G docker jenkins
"#;

/// Parameters of the build server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildServerSettings {
    /// `Name` tag of the instance
    pub instance_name: String,
    pub security_group_name: String,
    pub key_name: String,
    pub instance_type: String,
    pub image_id: String,
    /// Ingress ports opened to the world
    pub ports: Vec<u16>,
    pub user_data: String,
}

impl Default for BuildServerSettings {
    fn default() -> Self {
        Self {
            instance_name: "build-server".to_string(),
            security_group_name: "build-server-sg".to_string(),
            key_name: "build-server-key".to_string(),
            instance_type: "t3.micro".to_string(),
            image_id: "ami-0c7217cdde317cfec".to_string(),
            ports: vec![22, 8080],
            user_data: DEFAULT_USER_DATA.to_string(),
        }
    }
}

fn required_str<'a>(outputs: &'a BTreeMap<String, Value>, key: &str) -> CatalogResult<&'a str> {
    match outputs.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(other) => Err(CatalogError::InvalidOutput {
            key: key.to_string(),
            message: format!("expected a string, got {}", other),
        }),
        None => Err(CatalogError::MissingOutput(key.to_string())),
    }
}

/// First subnet the instance can launch into: a public one when the
/// environment exported them separately.
fn launch_subnet(outputs: &BTreeMap<String, Value>) -> CatalogResult<&str> {
    let key = if outputs.contains_key("public_subnet_ids") {
        "public_subnet_ids"
    } else {
        "subnet_ids"
    };
    let list = outputs
        .get(key)
        .ok_or_else(|| CatalogError::MissingOutput("subnet_ids".to_string()))?;
    let first = match list {
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    };
    first.ok_or_else(|| CatalogError::InvalidOutput {
        key: key.to_string(),
        message: "expected a non-empty list of subnet ids".to_string(),
    })
}

/// Build the bootstrap catalog from an environment's exported outputs.
pub fn build_server_catalog(
    outputs: &BTreeMap<String, Value>,
    settings: &BuildServerSettings,
) -> CatalogResult<ResourceCatalog> {
    let vpc_id = required_str(outputs, "vpc_id")?;
    let subnet_id = launch_subnet(outputs)?;

    let ingress: Vec<Value> = settings
        .ports
        .iter()
        .map(|port| json!({"protocol": "tcp", "from_port": port, "to_port": port, "cidr_blocks": ["0.0.0.0/0"]}))
        .collect();

    let security_group = ResourceSpec::new(ResourceKind::SecurityGroup, BUILD_SERVER_SECURITY_GROUP)
        .strategy(
            MatchStrategy::attribute("group-name", settings.security_group_name.clone())
                .and(Filter::new("vpc-id", vpc_id)),
        )
        .attributes(json!({
            "group_name": settings.security_group_name,
            "description": "Build server",
            "vpc_id": vpc_id,
            "ingress": ingress
        }))
        .tag("Name", settings.security_group_name.clone());

    let key_pair = ResourceSpec::new(ResourceKind::KeyPair, KEY_PAIR)
        .strategy(MatchStrategy::attribute("name", settings.key_name.clone()))
        .attributes(json!({"name": settings.key_name}))
        .tag("Name", settings.key_name.clone());

    let instance = ResourceSpec::new(ResourceKind::Instance, INSTANCE)
        .strategy(
            MatchStrategy::tag("Name", settings.instance_name.clone())
                .and(Filter::any_of("state", ["pending", "running"])),
        )
        .attributes(json!({
            "image_id": settings.image_id,
            "instance_type": settings.instance_type,
            "key_name": "{{key-pair.name}}",
            "subnet_id": subnet_id,
            "security_group_ids": ["{{security-group:build-server.id}}"],
            "associate_public_ip_address": true,
            "user_data": settings.user_data
        }))
        .depends_on(BUILD_SERVER_SECURITY_GROUP)
        .depends_on(KEY_PAIR)
        .tag("Name", settings.instance_name.clone())
        .ready_when(ReadinessCheck::state(["running"]));

    Ok(ResourceCatalog::builder("build-server")
        .resource(security_group)
        .resource(key_pair)
        .resource(instance)
        .build()?)
}

/// Outputs printed after the bootstrap.
pub fn build_server_outputs() -> Vec<OutputKey> {
    vec![
        OutputKey::attribute("instance_id", INSTANCE, "id"),
        OutputKey::attribute("public_ip", INSTANCE, "public-ip"),
        OutputKey::attribute("security_group_id", BUILD_SERVER_SECURITY_GROUP, "id"),
    ]
}
