//! Flat output map for downstream deployment stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult, MissingOutput};
use crate::result::ReconciliationResult;

/// Where an output value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    /// One attribute of one handle
    Attribute { logical_name: String, attribute: String },
    /// The same attribute gathered from several handles, as a list
    List { logical_names: Vec<String>, attribute: String },
    /// A fixed value known before the run (region, account)
    Literal(Value),
}

/// A named output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputKey {
    pub key: String,
    pub source: OutputSource,
}

impl OutputKey {
    pub fn attribute(key: impl Into<String>, logical_name: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: OutputSource::Attribute {
                logical_name: logical_name.into(),
                attribute: attribute.into(),
            },
        }
    }

    pub fn list(
        key: impl Into<String>,
        logical_names: impl IntoIterator<Item = impl Into<String>>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            source: OutputSource::List {
                logical_names: logical_names.into_iter().map(Into::into).collect(),
                attribute: attribute.into(),
            },
        }
    }

    pub fn literal(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            source: OutputSource::Literal(value.into()),
        }
    }
}

/// Collects requested attributes off completed handles.
pub struct OutputExporter;

impl OutputExporter {
    /// Build the output map.
    ///
    /// Fails with [`CoreError::IncompleteOutputs`] listing every key whose
    /// handle did not complete or lacks the attribute.
    pub fn export(result: &ReconciliationResult, keys: &[OutputKey]) -> CoreResult<BTreeMap<String, Value>> {
        let mut outputs = BTreeMap::new();
        let mut missing = Vec::new();

        for output in keys {
            match &output.source {
                OutputSource::Attribute { logical_name, attribute } => {
                    match lookup(result, logical_name, attribute) {
                        Ok(value) => {
                            outputs.insert(output.key.clone(), value);
                        }
                        Err(reason) => missing.push(MissingOutput {
                            key: output.key.clone(),
                            logical_name: logical_name.clone(),
                            reason,
                        }),
                    }
                }
                OutputSource::List { logical_names, .. } if logical_names.is_empty() => {
                    missing.push(MissingOutput {
                        key: output.key.clone(),
                        logical_name: String::new(),
                        reason: "no resources listed".to_string(),
                    });
                }
                OutputSource::List { logical_names, attribute } => {
                    let mut values = Vec::with_capacity(logical_names.len());
                    let before = missing.len();
                    for logical_name in logical_names {
                        match lookup(result, logical_name, attribute) {
                            Ok(value) => values.push(value),
                            Err(reason) => missing.push(MissingOutput {
                                key: output.key.clone(),
                                logical_name: logical_name.clone(),
                                reason,
                            }),
                        }
                    }
                    if missing.len() == before {
                        outputs.insert(output.key.clone(), Value::Array(values));
                    }
                }
                OutputSource::Literal(value) => {
                    outputs.insert(output.key.clone(), value.clone());
                }
            }
        }

        if missing.is_empty() {
            Ok(outputs)
        } else {
            Err(CoreError::IncompleteOutputs(missing))
        }
    }
}

fn lookup(result: &ReconciliationResult, logical_name: &str, attribute: &str) -> Result<Value, String> {
    let Some(handle) = result.handle(logical_name) else {
        let reason = if result.pending.contains_key(logical_name) {
            "not ready"
        } else if result.absent.iter().any(|a| a == logical_name) {
            "not found"
        } else {
            "not reconciled"
        };
        return Err(reason.to_string());
    };
    match handle.attribute(attribute) {
        Some(Value::Null) | None => Err(format!("no attribute '{}'", attribute)),
        Some(value) => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Origin, ResourceHandle};
    use berth_provider::{RemoteResource, ResourceKind};
    use serde_json::json;

    fn result() -> ReconciliationResult {
        let mut result = ReconciliationResult::new("test");
        let lb = RemoteResource::new(ResourceKind::LoadBalancer, "arn:lb")
            .with_arn("arn:lb")
            .with_attribute("dns-name", "alb.example.com");
        result.handles.insert(
            "load-balancer".into(),
            ResourceHandle::from_remote("load-balancer", &lb, Origin::Created),
        );
        for (name, id) in [("subnet:a", "subnet-a"), ("subnet:b", "subnet-b")] {
            let subnet = RemoteResource::new(ResourceKind::Subnet, id);
            result
                .handles
                .insert(name.into(), ResourceHandle::from_remote(name, &subnet, Origin::Discovered));
        }
        let nat = RemoteResource::new(ResourceKind::NatGateway, "nat-1").with_state("pending");
        result
            .pending
            .insert("nat-gateway".into(), ResourceHandle::from_remote("nat-gateway", &nat, Origin::Created));
        result
    }

    #[test]
    fn test_export() {
        let outputs = OutputExporter::export(
            &result(),
            &[
                OutputKey::attribute("alb_dns_name", "load-balancer", "dns-name"),
                OutputKey::attribute("alb_arn", "load-balancer", "arn"),
                OutputKey::list("subnet_ids", ["subnet:a", "subnet:b"], "id"),
                OutputKey::literal("region", "eu-west-1"),
            ],
        )
        .unwrap();

        assert_eq!(outputs["alb_dns_name"], json!("alb.example.com"));
        assert_eq!(outputs["alb_arn"], json!("arn:lb"));
        assert_eq!(outputs["subnet_ids"], json!(["subnet-a", "subnet-b"]));
        assert_eq!(outputs["region"], json!("eu-west-1"));
    }

    #[test]
    fn test_lists_every_missing_key() {
        let err = OutputExporter::export(
            &result(),
            &[
                OutputKey::attribute("alb_dns_name", "load-balancer", "dns-name"),
                OutputKey::attribute("alb_zone_id", "load-balancer", "canonical-hosted-zone-id"),
                OutputKey::attribute("nat_id", "nat-gateway", "id"),
                OutputKey::list("subnet_ids", ["subnet:a", "subnet:c"], "id"),
            ],
        )
        .unwrap_err();

        match err {
            CoreError::IncompleteOutputs(missing) => {
                let keys: Vec<&str> = missing.iter().map(|m| m.key.as_str()).collect();
                assert_eq!(keys, vec!["alb_zone_id", "nat_id", "subnet_ids"]);
                assert_eq!(missing[1].reason, "not ready");
                assert_eq!(missing[2].logical_name, "subnet:c");
                assert_eq!(missing[2].reason, "not reconciled");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_list_is_missing() {
        let empty: [&str; 0] = [];
        let err = OutputExporter::export(
            &result(),
            &[
                OutputKey::attribute("alb_dns_name", "load-balancer", "dns-name"),
                OutputKey::list("private_subnet_ids", empty, "id"),
            ],
        )
        .unwrap_err();

        match &err {
            CoreError::IncompleteOutputs(missing) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].key, "private_subnet_ids");
                assert_eq!(missing[0].reason, "no resources listed");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().contains("private_subnet_ids (no resources listed)"), "{}", err);
    }
}
