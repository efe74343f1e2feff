//! # Stateful Set Builder
//!
//! Desired ActiveGate stateful set of a DynaKube. Building is pure: the same
//! DynaKube, tenant info, cluster UID and custom properties hash always give
//! byte-identical JSON and therefore the same template hash.

use crate::constants::{
    ACTIVEGATE_CONTAINER_NAME, ACTIVEGATE_IMAGE_PATH, ACTIVEGATE_PROBE_PORT,
    CUSTOM_PROPERTIES_HASH_ANNOTATION, CUSTOM_PROPERTIES_KEY, CUSTOM_PROPERTIES_MOUNT_PATH,
    CUSTOM_PROPERTIES_PATH, CUSTOM_PROPERTIES_VOLUME, DEFAULT_CPU_REQUEST, DT_CAPABILITIES,
    DT_ID_SEED_K8S_CLUSTER_ID, DT_ID_SEED_NAMESPACE, DT_SERVER, DT_TENANT, DT_TOKEN,
    KUBERNETES_MONITORING_CAPABILITY, PROXY_ARG, PROXY_ENV, PROXY_SECRET_KEY,
    TEMPLATE_HASH_ANNOTATION,
};
use crate::controller::pull_secret::registry_from_api_url;
use crate::crd::DynaKube;
use crate::tenant::TenantInfo;
use crate::util::{activegate_labels, fnv1_32_hex, merge_labels};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, EnvVarSource, HTTPGetAction, KeyToPath, LocalObjectReference,
    NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

const ARCH_LABEL: &str = "kubernetes.io/arch";
const OS_LABEL: &str = "kubernetes.io/os";
const BETA_ARCH_LABEL: &str = "beta.kubernetes.io/arch";
const BETA_OS_LABEL: &str = "beta.kubernetes.io/os";

/// ActiveGate image, either user-provided or from the tenant registry
pub fn activegate_image(dynakube: &DynaKube) -> String {
    if let Some(image) = dynakube.custom_activegate_image() {
        return image.to_string();
    }
    let registry = registry_from_api_url(&dynakube.spec.api_url);
    match dynakube
        .spec
        .kubernetes_monitoring
        .activegate_version
        .as_deref()
        .filter(|v| !v.is_empty())
    {
        Some(version) => format!("{registry}/{ACTIVEGATE_IMAGE_PATH}:{version}"),
        None => format!("{registry}/{ACTIVEGATE_IMAGE_PATH}"),
    }
}

pub fn build_stateful_set(
    dynakube: &DynaKube,
    tenant_info: &TenantInfo,
    kube_system_uid: &str,
    custom_properties_hash: Option<&str>,
) -> Result<StatefulSet, serde_json::Error> {
    let name = dynakube.name_any();
    let monitoring = &dynakube.spec.kubernetes_monitoring;
    let match_labels = activegate_labels(&name);
    let labels = merge_labels(&[dynakube.labels(), &match_labels, &monitoring.labels]);

    let template_annotations = custom_properties_hash
        .map(|hash| BTreeMap::from([(CUSTOM_PROPERTIES_HASH_ANNOTATION.to_string(), hash.to_string())]));

    let mut sts = StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(dynakube.namespace_or_default()),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::new()),
            ..ObjectMeta::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(monitoring.replicas.unwrap_or(1)),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(match_labels),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: template_annotations,
                    ..ObjectMeta::default()
                }),
                spec: Some(build_pod_spec(dynakube, tenant_info, kube_system_uid)),
            },
            ..StatefulSetSpec::default()
        }),
        status: None,
    };

    let hash = template_hash(&sts)?;
    sts.annotations_mut()
        .insert(TEMPLATE_HASH_ANNOTATION.to_string(), hash);
    Ok(sts)
}

/// FNV-32 of the stateful set JSON with its annotations emptied
pub fn template_hash(sts: &StatefulSet) -> Result<String, serde_json::Error> {
    let mut unannotated = sts.clone();
    unannotated.metadata.annotations = Some(BTreeMap::new());
    Ok(fnv1_32_hex(&serde_json::to_vec(&unannotated)?))
}

/// Template hash a stateful set was written with
pub fn recorded_template_hash(sts: &StatefulSet) -> Option<&str> {
    sts.annotations()
        .get(TEMPLATE_HASH_ANNOTATION)
        .map(String::as_str)
}

fn build_pod_spec(dynakube: &DynaKube, tenant_info: &TenantInfo, kube_system_uid: &str) -> PodSpec {
    let monitoring = &dynakube.spec.kubernetes_monitoring;
    let volumes = custom_properties_volume(dynakube).map(|v| vec![v]);

    PodSpec {
        containers: vec![build_container(dynakube, tenant_info, kube_system_uid)],
        service_account_name: Some(dynakube.monitoring_service_account()),
        node_selector: (!monitoring.node_selector.is_empty()).then(|| monitoring.node_selector.clone()),
        tolerations: (!monitoring.tolerations.is_empty()).then(|| monitoring.tolerations.clone()),
        dns_policy: monitoring.dns_policy.clone().filter(|p| !p.is_empty()),
        priority_class_name: monitoring.priority_class_name.clone().filter(|p| !p.is_empty()),
        image_pull_secrets: Some(vec![LocalObjectReference {
            name: dynakube.pull_secret_name(),
        }]),
        affinity: Some(node_affinity()),
        volumes,
        ..PodSpec::default()
    }
}

fn build_container(dynakube: &DynaKube, tenant_info: &TenantInfo, kube_system_uid: &str) -> Container {
    let volume_mounts = dynakube.custom_properties().map(|_| {
        vec![VolumeMount {
            name: CUSTOM_PROPERTIES_VOLUME.to_string(),
            mount_path: CUSTOM_PROPERTIES_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]
    });

    Container {
        name: ACTIVEGATE_CONTAINER_NAME.to_string(),
        image: Some(activegate_image(dynakube)),
        image_pull_policy: Some("Always".to_string()),
        args: Some(build_args(dynakube)),
        env: Some(build_env(dynakube, tenant_info, kube_system_uid)),
        resources: Some(build_resources(dynakube.spec.kubernetes_monitoring.resources.as_ref())),
        readiness_probe: Some(https_probe("/rest/health", 30, 15, 3)),
        liveness_probe: Some(https_probe("/rest/state", 30, 30, 2)),
        volume_mounts,
        ..Container::default()
    }
}

pub fn build_args(dynakube: &DynaKube) -> Vec<String> {
    let monitoring = &dynakube.spec.kubernetes_monitoring;
    let mut args = monitoring.args.clone();
    args.extend([
        format!("--tenant=$({DT_TENANT})"),
        format!("--token=$({DT_TOKEN})"),
        format!("--server=$({DT_SERVER})"),
        format!("--enable=$({DT_CAPABILITIES})"),
    ]);
    if let Some(zone) = dynakube.network_zone() {
        args.push(format!(r#"--networkzone="{zone}""#));
    }
    if dynakube.proxy().is_some() {
        args.push(PROXY_ARG.to_string());
    }
    if let Some(group) = monitoring.group.as_deref().filter(|g| !g.is_empty()) {
        args.push(format!(r#"--group="{group}""#));
    }
    args
}

pub fn build_env(dynakube: &DynaKube, tenant_info: &TenantInfo, kube_system_uid: &str) -> Vec<EnvVar> {
    let plain = |name: &str, value: &str| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    };

    let mut env = dynakube.spec.kubernetes_monitoring.env.clone();
    env.extend([
        plain(DT_TENANT, &tenant_info.id),
        plain(DT_TOKEN, &tenant_info.token),
        plain(DT_SERVER, &tenant_info.communication_endpoint),
        plain(DT_CAPABILITIES, KUBERNETES_MONITORING_CAPABILITY),
        plain(DT_ID_SEED_NAMESPACE, &dynakube.namespace_or_default()),
        plain(DT_ID_SEED_K8S_CLUSTER_ID, kube_system_uid),
    ]);

    if let Some(proxy) = dynakube.proxy() {
        match proxy.secret_ref() {
            Some(secret) => env.push(EnvVar {
                name: PROXY_ENV.to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.to_string(),
                        key: PROXY_SECRET_KEY.to_string(),
                        optional: None,
                    }),
                    ..EnvVarSource::default()
                }),
            }),
            None => env.push(plain(PROXY_ENV, proxy.literal().unwrap_or_default())),
        }
    }
    env
}

/// User resources with a CPU request filled in
pub fn build_resources(user: Option<&ResourceRequirements>) -> ResourceRequirements {
    let mut resources = user.cloned().unwrap_or_default();
    resources
        .requests
        .get_or_insert_with(BTreeMap::new)
        .entry("cpu".to_string())
        .or_insert_with(|| Quantity(DEFAULT_CPU_REQUEST.to_string()));
    resources
}

fn https_probe(path: &str, initial_delay: i32, period: i32, failures: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(ACTIVEGATE_PROBE_PORT),
            scheme: Some("HTTPS".to_string()),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold: Some(failures),
        ..Probe::default()
    }
}

/// Linux on amd64 or arm64, with the legacy beta labels as an alternative term
fn node_affinity() -> Affinity {
    let term = |arch_key: &str, os_key: &str| NodeSelectorTerm {
        match_expressions: Some(vec![
            NodeSelectorRequirement {
                key: arch_key.to_string(),
                operator: "In".to_string(),
                values: Some(vec!["amd64".to_string(), "arm64".to_string()]),
            },
            NodeSelectorRequirement {
                key: os_key.to_string(),
                operator: "In".to_string(),
                values: Some(vec!["linux".to_string()]),
            },
        ]),
        match_fields: None,
    };

    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![
                    term(BETA_ARCH_LABEL, BETA_OS_LABEL),
                    term(ARCH_LABEL, OS_LABEL),
                ],
            }),
            ..NodeAffinity::default()
        }),
        ..Affinity::default()
    }
}

fn custom_properties_volume(dynakube: &DynaKube) -> Option<Volume> {
    let properties = dynakube.custom_properties()?;
    let secret_name = properties
        .secret_ref()
        .map_or_else(|| dynakube.custom_properties_secret_name(), str::to_string);
    Some(Volume {
        name: CUSTOM_PROPERTIES_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name),
            items: Some(vec![KeyToPath {
                key: CUSTOM_PROPERTIES_KEY.to_string(),
                path: CUSTOM_PROPERTIES_PATH.to_string(),
                mode: None,
            }]),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    })
}
