//! # Pod Update
//!
//! Deletes ActiveGate pods whose `version` label lags behind the version of
//! their image in the registry, so the stateful set recreates them.
//!
//! Runs at most once per cooldown window, tracked by
//! `status.updatedTimestamp`.

use crate::constants::{POD_UPDATE_COOLDOWN, VERSION_LABEL};
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError};
use crate::controller::version_label::{
    labeled_version, list_activegate_pods, load_pull_secret_config, remote_pod_version,
};
use crate::crd::{DynaKube, DynaKubeStatus};
use crate::observability::metrics;
use crate::registry::ImageMetadataFetcher;
use crate::util::{DockerConfig, classify_kube_error, compare_semver, is_not_found};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::{Api, Client, ResourceExt};
use std::cmp::Ordering;
use tracing::{debug, info};

const OP: &str = "pod_update";

/// Pod running an older image version than the registry reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutdatedPod {
    pub name: String,
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Default)]
pub struct OutdatedScan {
    pub outdated: Vec<OutdatedPod>,
    pub errors: Vec<ReconcilerError>,
}

/// Whether the last pass was within the cooldown window
pub fn in_cooldown(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last_update) = last_update else {
        return false;
    };
    let cooldown = chrono::Duration::from_std(POD_UPDATE_COOLDOWN).unwrap_or_else(|_| chrono::Duration::minutes(5));
    now <= last_update + cooldown
}

/// Compare the labeled version of each pod with its remote image version
///
/// Pods without a label are left for the version labeler.
pub async fn find_outdated_pods(
    pods: &[Pod],
    fetcher: &dyn ImageMetadataFetcher,
    docker_config: Option<&DockerConfig>,
) -> OutdatedScan {
    let mut scan = OutdatedScan::default();
    for pod in pods {
        let Some(local) = labeled_version(pod) else {
            continue;
        };
        let name = pod.name_any();
        let remote = match remote_pod_version(pod, fetcher, docker_config).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                scan.errors.push(ReconcilerError::Protocol {
                    op: OP,
                    message: format!("image of pod {name} has no {VERSION_LABEL} label"),
                });
                continue;
            }
            Err(source) => {
                scan.errors.push(ReconcilerError::Registry { op: OP, source });
                continue;
            }
        };

        match compare_semver(local, &remote) {
            (_, Some(e)) => scan.errors.push(ReconcilerError::Protocol {
                op: OP,
                message: format!("pod {name}: {e}"),
            }),
            (Ordering::Equal, None) => {}
            (_, None) => scan.outdated.push(OutdatedPod {
                name,
                local: local.to_string(),
                remote,
            }),
        }
    }
    scan
}

pub async fn reconcile_pod_update(
    client: &Client,
    dynakube: &DynaKube,
    status: &mut DynaKubeStatus,
    fetcher: &dyn ImageMetadataFetcher,
    now: DateTime<Utc>,
) -> ReconcileOutcome {
    let namespace = dynakube.namespace_or_default();
    if in_cooldown(status.updated_timestamp, now) {
        debug!(namespace = %namespace, name = %dynakube.name_any(), op = OP, "Within cooldown, skipping");
        return ReconcileOutcome::done();
    }

    let pods = match list_activegate_pods(client, dynakube, OP).await {
        Ok(pods) => pods,
        Err(e) => return ReconcileOutcome::report(e),
    };
    let docker_config = load_pull_secret_config(client, dynakube).await;
    let mut scan = find_outdated_pods(&pods, fetcher, docker_config.as_ref()).await;

    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let mut deleted = 0;
    for pod in &scan.outdated {
        match api.delete(&pod.name, &DeleteParams::default()).await {
            Ok(_) => {
                deleted += 1;
                info!(
                    namespace = %namespace,
                    name = %dynakube.name_any(),
                    op = OP,
                    pod = %pod.name,
                    local = %pod.local,
                    remote = %pod.remote,
                    "Deleted outdated pod"
                );
            }
            Err(e) if is_not_found(&e) => {
                debug!(namespace = %namespace, pod = %pod.name, op = OP, "Outdated pod already gone");
            }
            Err(e) => scan.errors.push(classify_kube_error(e, OP)),
        }
    }
    metrics::increment_pods_deleted(deleted);
    status.updated_timestamp = Some(now);

    match scan.errors.into_iter().next() {
        Some(e) => ReconcileOutcome::report(e),
        None => ReconcileOutcome::done(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryAuth, RegistryError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use kube::api::ObjectMeta;
    use std::collections::{BTreeMap, HashMap};

    struct FakeRegistry(HashMap<String, Option<String>>);

    #[async_trait]
    impl ImageMetadataFetcher for FakeRegistry {
        async fn image_version(
            &self,
            image: &str,
            _auth: Option<&RegistryAuth>,
        ) -> Result<Option<String>, RegistryError> {
            self.0
                .get(image)
                .cloned()
                .ok_or_else(|| RegistryError::Status {
                    code: 404,
                    url: image.to_string(),
                })
        }
    }

    fn pod(name: &str, version: Option<&str>, image: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: version.map(|v| BTreeMap::from([(VERSION_LABEL.to_string(), v.to_string())])),
                ..ObjectMeta::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "dynatrace-operator".to_string(),
                    image: image.to_string(),
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn test_cooldown() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(!in_cooldown(None, t0));
        assert!(in_cooldown(Some(t0), t0));
        assert!(in_cooldown(Some(t0), t0 + chrono::Duration::minutes(5)));
        assert!(!in_cooldown(Some(t0), t0 + chrono::Duration::minutes(5) + chrono::Duration::seconds(1)));
        assert!(!in_cooldown(Some(t0 - chrono::Duration::minutes(5)), t0 + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_find_outdated_pods() {
        let registry = FakeRegistry(HashMap::from([
            ("reg/ag:new".to_string(), Some("1.201.0.20240101-000000".to_string())),
            ("reg/ag:same".to_string(), Some("1.200.0".to_string())),
            ("reg/ag:unlabeled".to_string(), None),
        ]));
        let pods = vec![
            pod("outdated", Some("1.200.0"), "reg/ag:new"),
            pod("current", Some("1.200.0"), "reg/ag:same"),
            pod("no-label", None, "reg/ag:new"),
            pod("no-remote-label", Some("1.200.0"), "reg/ag:unlabeled"),
            pod("unreachable", Some("1.200.0"), "reg/ag:missing"),
        ];

        let scan = find_outdated_pods(&pods, &registry, None).await;
        assert_eq!(
            scan.outdated,
            vec![OutdatedPod {
                name: "outdated".to_string(),
                local: "1.200.0".to_string(),
                remote: "1.201.0.20240101-000000".to_string(),
            }]
        );
        assert_eq!(scan.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_local_version_is_not_deleted() {
        let registry = FakeRegistry(HashMap::from([(
            "reg/ag:new".to_string(),
            Some("1.201.0".to_string()),
        )]));
        let pods = vec![pod("weird", Some("latest"), "reg/ag:new")];
        let scan = find_outdated_pods(&pods, &registry, None).await;
        assert!(scan.outdated.is_empty());
        assert_eq!(scan.errors.len(), 1);
    }
}
