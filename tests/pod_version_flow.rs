//! Version labeling followed by the pod update, in tick order, against an
//! in-memory API server

#[cfg(test)]
mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::apiserver::FakeApiServer;
use dynakube_operator::controller::pod_update::reconcile_pod_update;
use dynakube_operator::controller::version_label::reconcile_version_labels;
use dynakube_operator::crd::{DynaKube, DynaKubeSpec, DynaKubeStatus};
use dynakube_operator::registry::{ImageMetadataFetcher, RegistryAuth, RegistryError};
use dynakube_operator::util::activegate_labels;
use kube::api::{Api, ListParams};
use k8s_openapi::api::core::v1::Pod;
use serde_json::json;

const NAMESPACE: &str = "dynatrace";
const POD_PATH: &str = "/api/v1/namespaces/dynatrace/pods/dk-activegate-0";

struct FixedRegistry(&'static str);

#[async_trait]
impl ImageMetadataFetcher for FixedRegistry {
    async fn image_version(
        &self,
        _image: &str,
        _auth: Option<&RegistryAuth>,
    ) -> Result<Option<String>, RegistryError> {
        Ok(Some(self.0.to_string()))
    }
}

fn dynakube() -> DynaKube {
    let mut dk = DynaKube::new(
        "dk",
        DynaKubeSpec {
            api_url: "https://abc.example/api".to_string(),
            ..DynaKubeSpec::default()
        },
    );
    dk.metadata.namespace = Some(NAMESPACE.to_string());
    dk.spec.kubernetes_monitoring.enabled = true;
    dk
}

fn activegate_pod(version: Option<&str>) -> serde_json::Value {
    let mut labels = serde_json::to_value(activegate_labels("dk")).unwrap();
    if let Some(version) = version {
        labels["version"] = json!(version);
    }
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "dk-activegate-0",
            "namespace": NAMESPACE,
            "labels": labels,
        },
        "spec": {
            "containers": [{ "name": "dynatrace-operator", "image": "abc.example/linux/activegate:latest" }]
        },
        "status": {
            "containerStatuses": [{
                "name": "dynatrace-operator",
                "image": "abc.example/linux/activegate:latest",
                "imageID": "abc.example/linux/activegate@sha256:0000",
                "ready": true,
                "restartCount": 0
            }]
        }
    })
}

fn has_write(server: &FakeApiServer, method: &str) -> bool {
    server
        .writes()
        .iter()
        .any(|(m, path)| m.as_str() == method && path == POD_PATH)
}

#[tokio::test]
async fn test_outdated_pod_is_deleted_after_labeling() {
    let server = FakeApiServer::start().await;
    server.insert(POD_PATH, activegate_pod(Some("1.200.0")));
    let client = server.client();
    let dk = dynakube();
    let registry = FixedRegistry("1.201.0.20240101-120000");
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    let (outcome, running) = reconcile_version_labels(&client, &dk, &registry).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(running.as_deref(), Some("1.200.0"));
    assert!(!has_write(&server, "PATCH"), "existing version label must not be rewritten");
    assert_eq!(
        server.object(POD_PATH).unwrap()["metadata"]["labels"]["version"],
        "1.200.0"
    );

    let mut status = DynaKubeStatus::default();
    let outcome = reconcile_pod_update(&client, &dk, &mut status, &registry, now).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert!(has_write(&server, "DELETE"));
    assert!(server.object(POD_PATH).is_none());
    assert_eq!(status.updated_timestamp, Some(now));

    let pods: Api<Pod> = Api::namespaced(client, NAMESPACE);
    assert!(pods.list(&ListParams::default()).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_unlabeled_pod_is_labeled_and_kept() {
    let server = FakeApiServer::start().await;
    server.insert(POD_PATH, activegate_pod(None));
    let client = server.client();
    let dk = dynakube();
    let registry = FixedRegistry("1.201.0.20240101-120000");
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    let (outcome, running) = reconcile_version_labels(&client, &dk, &registry).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(running, None);
    assert_eq!(
        server.object(POD_PATH).unwrap()["metadata"]["labels"]["version"],
        "1.201.0"
    );

    let mut status = DynaKubeStatus::default();
    let outcome = reconcile_pod_update(&client, &dk, &mut status, &registry, now).await;
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert!(!has_write(&server, "DELETE"));
    assert!(server.object(POD_PATH).is_some());
    assert_eq!(status.updated_timestamp, Some(now));
}

#[tokio::test]
async fn test_pod_update_skips_within_cooldown() {
    let server = FakeApiServer::start().await;
    server.insert(POD_PATH, activegate_pod(Some("1.200.0")));
    let client = server.client();
    let dk = dynakube();
    let registry = FixedRegistry("1.201.0");
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    let last_update = now - chrono::Duration::minutes(4);
    let mut status = DynaKubeStatus {
        updated_timestamp: Some(last_update),
        ..DynaKubeStatus::default()
    };
    let outcome = reconcile_pod_update(&client, &dk, &mut status, &registry, now).await;
    assert!(outcome.is_ok());
    assert!(server.object(POD_PATH).is_some());
    assert_eq!(status.updated_timestamp, Some(last_update));
}
