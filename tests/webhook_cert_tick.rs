//! Webhook certificate ticks against an in-memory API server

#[cfg(test)]
mod common;

use axum::http::Method;
use chrono::{TimeZone, Utc};
use common::apiserver::FakeApiServer;
use dynakube_operator::certificates::{CertValidator, WebhookCertController};
use dynakube_operator::config::ControllerConfig;
use dynakube_operator::util::FixedClock;
use serde_json::{Value, json};
use std::sync::Arc;

const SECRET_PATH: &str = "/api/v1/namespaces/dynatrace/secrets/dynatrace-webhook-certs";
const MUTATING_PATH: &str =
    "/apis/admissionregistration.k8s.io/v1/mutatingwebhookconfigurations/dynatrace-webhook";
const VALIDATING_PATH: &str =
    "/apis/admissionregistration.k8s.io/v1/validatingwebhookconfigurations/dynatrace-webhook";

fn webhook_configuration(kind: &str, webhooks: &[&str]) -> Value {
    let webhooks: Vec<Value> = webhooks
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "admissionReviewVersions": ["v1"],
                "sideEffects": "None",
                "clientConfig": {
                    "service": { "name": "dynatrace-webhook", "namespace": "dynatrace" }
                }
            })
        })
        .collect();
    json!({
        "apiVersion": "admissionregistration.k8s.io/v1",
        "kind": kind,
        "metadata": { "name": "dynatrace-webhook" },
        "webhooks": webhooks,
    })
}

fn controller(server: &FakeApiServer, certs_dir: &std::path::Path) -> WebhookCertController {
    let config = ControllerConfig {
        operator_namespace: "dynatrace".to_string(),
        certs_dir: certs_dir.to_path_buf(),
        ..ControllerConfig::default()
    };
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
    WebhookCertController::new(
        server.client(),
        Arc::new(config),
        CertValidator::with_key_bits(2048),
        Arc::new(clock),
    )
}

fn count_writes(server: &FakeApiServer, method: &Method, path: &str) -> usize {
    server
        .writes()
        .iter()
        .filter(|(m, p)| m == method && p == path)
        .count()
}

#[tokio::test]
async fn test_tick_creates_secret_and_injects_ca_bundle() {
    let server = FakeApiServer::start().await;
    server.insert(
        MUTATING_PATH,
        webhook_configuration("MutatingWebhookConfiguration", &["pod.dynatrace.com", "ns.dynatrace.com"]),
    );
    server.insert(
        VALIDATING_PATH,
        webhook_configuration("ValidatingWebhookConfiguration", &["dynakube.dynatrace.com"]),
    );
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&server, dir.path());

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let outcome = controller.tick(now).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(outcome.ca_changed);
    assert!(outcome.tls_changed);

    let secrets_path = SECRET_PATH.rsplit_once('/').unwrap().0;
    assert_eq!(count_writes(&server, &Method::POST, secrets_path), 1);
    let secret = server.object(SECRET_PATH).expect("certificate secret created");
    assert_eq!(secret["type"], "Opaque");
    let ca = secret["data"]["ca.crt"].as_str().expect("ca.crt in secret").to_string();

    for (path, hooks) in [(MUTATING_PATH, 2), (VALIDATING_PATH, 1)] {
        let config = server.object(path).unwrap();
        let webhooks = config["webhooks"].as_array().unwrap();
        assert_eq!(webhooks.len(), hooks);
        for webhook in webhooks {
            assert_eq!(webhook["clientConfig"]["caBundle"].as_str(), Some(ca.as_str()));
        }
    }

    assert!(dir.path().join("tls.crt").exists());
    assert!(dir.path().join("tls.key").exists());
}

#[tokio::test]
async fn test_second_tick_writes_nothing() {
    let server = FakeApiServer::start().await;
    server.insert(
        MUTATING_PATH,
        webhook_configuration("MutatingWebhookConfiguration", &["pod.dynatrace.com"]),
    );
    server.insert(
        VALIDATING_PATH,
        webhook_configuration("ValidatingWebhookConfiguration", &["dynakube.dynatrace.com"]),
    );
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&server, dir.path());
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    assert!(controller.tick(now).await.error.is_none());
    let writes_after_first = server.writes().len();
    let secret = server.object(SECRET_PATH).unwrap();

    let outcome = controller.tick(now + chrono::Duration::minutes(5)).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(!outcome.ca_changed);
    assert!(!outcome.tls_changed);
    assert_eq!(server.writes().len(), writes_after_first);
    assert_eq!(count_writes(&server, &Method::PUT, SECRET_PATH), 0);
    assert_eq!(server.object(SECRET_PATH).unwrap()["data"], secret["data"]);
}

#[tokio::test]
async fn test_tick_without_webhook_configurations() {
    let server = FakeApiServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&server, dir.path());
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

    let outcome = controller.tick(now).await;
    assert!(outcome.error.is_none(), "{:?}", outcome.error);
    assert!(server.object(SECRET_PATH).is_some());
    assert_eq!(count_writes(&server, &Method::PUT, MUTATING_PATH), 0);
    assert_eq!(count_writes(&server, &Method::PUT, VALIDATING_PATH), 0);
}

#[tokio::test]
async fn test_tick_repairs_tampered_ca_bundle() {
    let server = FakeApiServer::start().await;
    server.insert(
        MUTATING_PATH,
        webhook_configuration("MutatingWebhookConfiguration", &["pod.dynatrace.com"]),
    );
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&server, dir.path());
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    assert!(controller.tick(now).await.error.is_none());

    let mut config = server.object(MUTATING_PATH).unwrap();
    config["webhooks"][0]["clientConfig"]["caBundle"] = json!("b3RoZXI=");
    server.insert(MUTATING_PATH, config);

    assert!(controller.tick(now).await.error.is_none());
    let ca = server.object(SECRET_PATH).unwrap()["data"]["ca.crt"].clone();
    assert_eq!(
        server.object(MUTATING_PATH).unwrap()["webhooks"][0]["clientConfig"]["caBundle"],
        ca
    );
    assert_eq!(count_writes(&server, &Method::PUT, MUTATING_PATH), 2);
}
