//! End-to-end scenarios driven through the pure parts of the reconcilers
//!
//! Kubernetes and the tenant are replaced by in-memory fakes; only the
//! decisions of each step are checked.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dynakube_operator::certificates::CertValidator;
use dynakube_operator::controller::dashboard::{DashboardOutcome, handle_dashboard_result};
use dynakube_operator::controller::pod_update::{find_outdated_pods, in_cooldown};
use dynakube_operator::controller::pull_secret::{build_pull_secret_data, registry_from_api_url};
use dynakube_operator::controller::reconciler::{
    ErrorKind, ReconcileOutcome, arbitrate, load_tokens, parse_tokens, resolve_phase,
};
use dynakube_operator::controller::statefulset::builder::{activegate_image, build_env, build_stateful_set};
use dynakube_operator::crd::{
    CONDITION_PAAS_TOKEN, DynaKube, DynaKubePhase, DynaKubeProxy, DynaKubeSpec, DynaKubeStatus,
    REASON_TOKEN_MISSING,
};
use dynakube_operator::registry::{ImageMetadataFetcher, RegistryAuth, RegistryError};
use dynakube_operator::tenant::{TenantError, TenantInfo};
use dynakube_operator::util::DockerConfig;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod, PodStatus, Secret};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;

fn dynakube() -> DynaKube {
    let mut dk = DynaKube::new(
        "dk",
        DynaKubeSpec {
            api_url: "https://abc.example/api".to_string(),
            tokens: Some("dk".to_string()),
            ..DynaKubeSpec::default()
        },
    );
    dk.metadata.namespace = Some("dynatrace".to_string());
    dk.metadata.uid = Some("dk-uid".to_string());
    dk.spec.kubernetes_monitoring.enabled = true;
    dk
}

fn tokens_secret(data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("dk".to_string()),
            namespace: Some("dynatrace".to_string()),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

#[test]
fn test_cold_start_builds_pull_secret_and_stateful_set() {
    let dk = dynakube();
    let tokens = parse_tokens(&tokens_secret(&[("apiToken", "A"), ("paasToken", "P")])).unwrap();

    let registry = registry_from_api_url(&dk.spec.api_url);
    assert_eq!(registry, "abc.example");
    let data = build_pull_secret_data(&registry, "U", &tokens.paas_token).unwrap();
    let json = &data[".dockerconfigjson"].0;
    let config: DockerConfig = serde_json::from_slice(json).unwrap();
    let auth = &config.auths["abc.example"];
    assert_eq!(auth.username, "U");
    assert_eq!(auth.password, "P");
    assert_eq!(auth.auth, "VTpQ");

    let tenant = TenantInfo::new("U".to_string(), "T".to_string(), vec!["https://comm/".to_string()]);
    let sts = build_stateful_set(&dk, &tenant, "kube-system-uid", None).unwrap();
    let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some("abc.example/linux/activegate"));
    assert_eq!(activegate_image(&dk), "abc.example/linux/activegate");

    let env: BTreeMap<&str, Option<&str>> = container
        .env
        .as_ref()
        .unwrap()
        .iter()
        .map(|e| (e.name.as_str(), e.value.as_deref()))
        .collect();
    assert_eq!(env["DT_TENANT"], Some("U"));
    assert_eq!(env["DT_TOKEN"], Some("T"));
    assert_eq!(env["DT_SERVER"], Some("https://comm/"));
}

#[test]
fn test_cert_renewal_after_tls_expiry_keeps_ca() {
    let validator = CertValidator::with_key_bits(2048);
    let domain = "dynatrace-webhook.dynatrace.svc";
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let first = validator.validate(None, domain, t0).unwrap();
    assert!(first.ca_changed && first.tls_changed);

    let later = validator
        .validate(Some(&first.bundle), domain, t0 + chrono::Duration::days(8))
        .unwrap();
    assert!(!later.ca_changed);
    assert!(later.tls_changed);
    assert_eq!(later.bundle.ca_cert(), first.bundle.ca_cert());
    assert_ne!(later.bundle.tls_cert(), first.bundle.tls_cert());
}

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

fn activegate_pod(name: &str, version: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([("version".to_string(), version.to_string())])),
            ..ObjectMeta::default()
        },
        status: Some(PodStatus {
            container_statuses: Some(vec![ContainerStatus {
                name: "dynatrace-operator".to_string(),
                image: "abc.example/linux/activegate:latest".to_string(),
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

#[tokio::test]
async fn test_outdated_pod_detection() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let status = DynaKubeStatus::default();
    assert!(!in_cooldown(status.updated_timestamp, now));

    let pods = vec![activegate_pod("dk-0", "1.200.0")];
    let scan = find_outdated_pods(&pods, &FixedRegistry("1.201.0"), None).await;
    assert!(scan.errors.is_empty());
    assert_eq!(scan.outdated.len(), 1);
    assert_eq!(scan.outdated[0].name, "dk-0");
    assert_eq!(scan.outdated[0].remote, "1.201.0");

    // A pass at `now` blocks the next one for five minutes
    assert!(in_cooldown(Some(now), now + chrono::Duration::minutes(4)));

    let current = vec![activegate_pod("dk-0", "1.201.0")];
    let scan = find_outdated_pods(&current, &FixedRegistry("1.201.0"), None).await;
    assert!(scan.outdated.is_empty());
}

#[test]
fn test_dashboard_already_registered_is_not_a_failure() {
    let outcome = handle_dashboard_result(
        Err(TenantError::Server {
            code: 400,
            message: "exists".to_string(),
        }),
        "dynatrace",
        "dk",
    );
    assert_eq!(outcome, DashboardOutcome::AlreadyExists);

    let arbitration = arbitrate([ReconcileOutcome::done(), ReconcileOutcome::done()]);
    assert!(arbitration.error.is_none());
    assert_eq!(
        resolve_phase(&arbitration, Some(DynaKubePhase::Running)),
        DynaKubePhase::Running
    );
}

#[test]
fn test_missing_paas_token_is_config_error() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let secret = tokens_secret(&[("apiToken", "A")]);
    let mut status = DynaKubeStatus::default();

    let err = load_tokens(&secret, &mut status, now).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let condition = status.condition(CONDITION_PAAS_TOKEN).unwrap();
    assert!(!condition.is_true());
    assert_eq!(condition.reason.as_deref(), Some(REASON_TOKEN_MISSING));

    let arbitration = arbitrate([ReconcileOutcome::fail(err)]);
    assert_eq!(resolve_phase(&arbitration, None), DynaKubePhase::Error);
    assert_eq!(arbitration.requeue_after, Duration::from_secs(300));
}

#[test]
fn test_proxy_from_secret_is_a_secret_ref() {
    let mut dk = dynakube();
    dk.spec.proxy = Some(DynaKubeProxy {
        value: None,
        value_from: Some("psec".to_string()),
    });
    let tenant = TenantInfo::new("U".to_string(), "T".to_string(), vec!["https://comm/".to_string()]);

    let env = build_env(&dk, &tenant, "kube-system-uid");
    let proxy = env.iter().find(|e| e.name == "ACTIVE_GATE_PROXY").unwrap();
    assert!(proxy.value.is_none());
    let selector = proxy
        .value_from
        .as_ref()
        .and_then(|source| source.secret_key_ref.as_ref())
        .unwrap();
    assert_eq!(selector.name, "psec");
    assert_eq!(selector.key, "proxy");
}
