//! The container environment reconciled end to end against the simulated cloud.

use std::sync::Arc;
use std::time::Duration;

use berth_catalog::environment::{
    CERTIFICATE, HTTPS_LISTENER, HTTP_LISTENER, LOAD_BALANCER, NAT_GATEWAY, NETWORK, PRIVATE_ROUTES,
};
use berth_catalog::{
    build_server_catalog, build_server_outputs, container_environment, standard_outputs, BuildServerSettings,
    CatalogProfile,
};
use berth_core::{
    EnvironmentConfig, NodeFailure, OutputExporter, Reconciler, ReconcilerSettings, RetryPolicy, WaitSettings,
};
use berth_provider::{Fault, Operation, RemoteResource, ResourceKind, SimulatedCloud};
use serde_json::{json, Value};

fn config() -> EnvironmentConfig {
    EnvironmentConfig {
        project: "shop".into(),
        environment: "prod".into(),
        ..Default::default()
    }
}

fn fast_settings() -> ReconcilerSettings {
    ReconcilerSettings {
        retry: RetryPolicy::immediate(3),
        wait: WaitSettings::new(Duration::from_millis(1), Duration::from_millis(500)),
        max_concurrency: 4,
    }
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty() && items.iter().all(non_empty),
        Value::Null => false,
        _ => true,
    }
}

#[tokio::test]
async fn test_standard_environment_converges() {
    let cloud = Arc::new(SimulatedCloud::new().ready_after_polls(2));
    let profile = CatalogProfile::standard();
    let catalog = container_environment(&config(), &profile).unwrap();
    let reconciler = Reconciler::new(cloud.clone()).with_settings(fast_settings());

    let first = reconciler.reconcile(&catalog).await;
    assert!(first.is_complete(), "errors: {:?}", first.errors);
    assert_eq!(first.handles.len(), catalog.len());

    let outputs = OutputExporter::export(&first, &standard_outputs(&config(), &profile)).unwrap();
    for (key, value) in &outputs {
        assert!(non_empty(value), "{} is empty", key);
    }
    assert_eq!(outputs["region"], json!("us-east-1"));
    assert_eq!(outputs["log_group_name"], json!("/ecs/shop-prod"));
    assert_eq!(outputs["subnet_ids"].as_array().map(Vec::len), Some(4));
    assert!(outputs["backend_repo_url"].as_str().unwrap().ends_with("/shop-backend"));

    cloud.clear_calls();
    let second = reconciler.reconcile(&catalog).await;
    assert!(second.is_complete(), "errors: {:?}", second.errors);
    assert_eq!(cloud.count(Operation::Create), 0);
    for (name, handle) in &first.handles {
        assert_eq!(second.handle(name).map(|h| h.id.as_str()), Some(handle.id.as_str()));
    }
}

#[tokio::test]
async fn test_nat_failure_leaves_platform_intact() {
    let cloud = Arc::new(SimulatedCloud::new().inject_persistent_fault(
        Operation::Create,
        Some(ResourceKind::NatGateway),
        Fault::QuotaExceeded,
    ));
    let catalog = container_environment(&config(), &CatalogProfile::standard()).unwrap();

    let result = Reconciler::new(cloud.clone())
        .with_settings(fast_settings())
        .reconcile(&catalog)
        .await;

    assert!(matches!(
        result.error_for(NAT_GATEWAY).map(|e| &e.failure),
        Some(NodeFailure::PermissionOrValidation { .. })
    ));
    assert!(matches!(
        result.error_for(PRIVATE_ROUTES).map(|e| &e.failure),
        Some(NodeFailure::DependencyUnresolved { .. })
    ));
    assert!(result.handle("cluster").is_some());
    assert!(result.handle("registry:backend").is_some());
    assert!(result.handle(HTTP_LISTENER).is_some());
}

#[tokio::test]
async fn test_adopts_default_network() {
    let cloud = Arc::new(
        SimulatedCloud::new()
            .seed(
                RemoteResource::new(ResourceKind::Network, "vpc-default")
                    .with_attribute("cidr-block", "172.31.0.0/16")
                    .with_attribute("is-default", true),
            )
            .seed(
                RemoteResource::new(ResourceKind::Subnet, "subnet-default-a")
                    .with_attribute("vpc-id", "vpc-default")
                    .with_attribute("availability-zone", "us-east-1a")
                    .with_attribute("default-for-az", true),
            )
            .seed(
                RemoteResource::new(ResourceKind::Subnet, "subnet-default-b")
                    .with_attribute("vpc-id", "vpc-default")
                    .with_attribute("availability-zone", "us-east-1b")
                    .with_attribute("default-for-az", true),
            ),
    );
    let profile = CatalogProfile::adopt_existing();
    let catalog = container_environment(&config(), &profile).unwrap();

    let result = Reconciler::new(cloud.clone())
        .with_settings(fast_settings())
        .reconcile(&catalog)
        .await;

    assert!(result.is_complete(), "errors: {:?}", result.errors);
    assert_eq!(cloud.create_count(ResourceKind::Network), 0);
    assert_eq!(cloud.create_count(ResourceKind::Subnet), 0);
    assert_eq!(cloud.create_count(ResourceKind::NatGateway), 0);

    let outputs = OutputExporter::export(&result, &standard_outputs(&config(), &profile)).unwrap();
    assert_eq!(outputs["vpc_id"], json!("vpc-default"));
    assert_eq!(outputs["subnet_ids"], json!(["subnet-default-a", "subnet-default-b"]));
}

#[tokio::test]
async fn test_adopt_without_network_is_absent() {
    let cloud = Arc::new(SimulatedCloud::new());
    let catalog = container_environment(&config(), &CatalogProfile::adopt_existing()).unwrap();

    let result = Reconciler::new(cloud.clone())
        .with_settings(fast_settings())
        .reconcile(&catalog)
        .await;

    assert!(result.absent.iter().any(|a| a == NETWORK));
    assert_eq!(cloud.create_count(ResourceKind::Network), 0);
    assert!(matches!(
        result.error_for("load-balancer").map(|e| &e.failure),
        Some(NodeFailure::DependencyUnresolved { .. })
    ));
    assert!(result.handle("cluster").is_some());
    assert!(result.handle("log-group").is_some());
}

#[tokio::test]
async fn test_https_with_issued_certificate() {
    let cloud = Arc::new(
        SimulatedCloud::new().seed(
            RemoteResource::new(ResourceKind::Certificate, "arn:aws:acm:us-east-1:123456789012:certificate/abc")
                .with_arn("arn:aws:acm:us-east-1:123456789012:certificate/abc")
                .with_attribute("domain-name", "shop.example.com")
                .with_attribute("status", "ISSUED"),
        ),
    );
    let profile = CatalogProfile::standard().with_certificate_domain("shop.example.com");
    let catalog = container_environment(&config(), &profile).unwrap();

    let result = Reconciler::new(cloud.clone())
        .with_settings(fast_settings())
        .reconcile(&catalog)
        .await;
    assert!(result.is_complete(), "errors: {:?}", result.errors);

    let https = cloud
        .resources(ResourceKind::Listener)
        .into_iter()
        .find(|l| l.field("port") == Some(json!(443)))
        .unwrap();
    assert_eq!(
        https.field("certificate-arn"),
        Some(json!("arn:aws:acm:us-east-1:123456789012:certificate/abc"))
    );

    let outputs = OutputExporter::export(&result, &standard_outputs(&config(), &profile)).unwrap();
    assert!(non_empty(&outputs["https_listener_arn"]));
}

#[tokio::test]
async fn test_https_without_certificate() {
    let cloud = Arc::new(SimulatedCloud::new());
    let profile = CatalogProfile::standard().with_certificate_domain("shop.example.com");
    let catalog = container_environment(&config(), &profile).unwrap();

    let result = Reconciler::new(cloud.clone())
        .with_settings(fast_settings())
        .reconcile(&catalog)
        .await;

    assert!(result.absent.iter().any(|a| a == CERTIFICATE));
    assert_eq!(cloud.create_count(ResourceKind::Certificate), 0);
    assert!(matches!(
        result.error_for(HTTPS_LISTENER).map(|e| &e.failure),
        Some(NodeFailure::DependencyUnresolved { .. })
    ));
    // The redirect targets port 443, so it waits on the HTTPS listener.
    assert!(result.handle(HTTP_LISTENER).is_none());
    assert!(result.error_for(HTTP_LISTENER).unwrap().failure.is_dependency_unresolved());
    assert!(cloud.resources(ResourceKind::Listener).is_empty());
    assert!(result.handle(LOAD_BALANCER).is_some());

    let err = OutputExporter::export(&result, &standard_outputs(&config(), &profile)).unwrap_err();
    assert!(err.to_string().contains("https_listener_arn"), "{}", err);
}

#[tokio::test]
async fn test_build_server_bootstrap_converges() {
    let cloud = Arc::new(SimulatedCloud::new().ready_after_polls(3));
    let profile = CatalogProfile::standard();
    let environment = container_environment(&config(), &profile).unwrap();
    let reconciler = Reconciler::new(cloud.clone()).with_settings(fast_settings());

    let result = reconciler.reconcile(&environment).await;
    let outputs = OutputExporter::export(&result, &standard_outputs(&config(), &profile)).unwrap();

    let bootstrap = build_server_catalog(&outputs, &BuildServerSettings::default()).unwrap();
    let first = reconciler.reconcile(&bootstrap).await;
    assert!(first.is_complete(), "errors: {:?}", first.errors);

    let server = OutputExporter::export(&first, &build_server_outputs()).unwrap();
    assert!(server["public_ip"].as_str().unwrap().starts_with("54.0.0."));

    let instance = &cloud.resources(ResourceKind::Instance)[0];
    assert_eq!(instance.field("subnet-id"), outputs["public_subnet_ids"].get(0).cloned());
    assert_eq!(instance.field("key-name"), Some(json!("build-server-key")));

    cloud.clear_calls();
    let second = reconciler.reconcile(&bootstrap).await;
    assert!(second.is_complete(), "errors: {:?}", second.errors);
    assert_eq!(cloud.count(Operation::Create), 0);
    assert_eq!(
        second.handle("instance").map(|h| h.id.as_str()),
        first.handle("instance").map(|h| h.id.as_str())
    );
}
