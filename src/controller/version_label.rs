//! # Version Label
//!
//! Labels ActiveGate pods that have no version yet with
//! `version=<major.minor.release>`, as read from the `version` label of their
//! image in the registry. Existing labels are never rewritten.
//!
//! The image is inspected with the credentials of the DynaKube pull secret.
//! A missing or unreadable pull secret falls back to anonymous access.

use crate::constants::{DEFAULT_CONFLICT_REQUEUE_SECS, FIELD_MANAGER, VERSION_LABEL};
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError};
use crate::crd::DynaKube;
use crate::registry::client::auth_registry;
use crate::registry::{ImageMetadataFetcher, RegistryAuth, RegistryError};
use crate::util::{DockerConfig, classify_kube_error, extract_semver, is_conflict};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const OP: &str = "version_label";

/// Docker config of the pull secret, `None` when it cannot be used
pub async fn load_pull_secret_config(client: &Client, dynakube: &DynaKube) -> Option<DockerConfig> {
    let namespace = dynakube.namespace_or_default();
    let name = dynakube.pull_secret_name();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let secret = match secrets.get_opt(&name).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            debug!(namespace = %namespace, secret = %name, op = OP, "Pull secret not found, inspecting images anonymously");
            return None;
        }
        Err(e) => {
            warn!(namespace = %namespace, secret = %name, op = OP, "Failed to read pull secret: {}", e);
            return None;
        }
    };
    match DockerConfig::from_secret(&secret) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(namespace = %namespace, secret = %name, op = OP, "Ignoring unreadable pull secret: {}", e);
            None
        }
    }
}

/// Credentials for the registry `image` lives in
pub fn auth_for_image(config: Option<&DockerConfig>, image: &str) -> Option<RegistryAuth> {
    let config = config?;
    let registry = auth_registry(image)?;
    match config.credentials_for(&registry) {
        Ok(credentials) => credentials.map(|(user, pass)| RegistryAuth::new(user, pass)),
        Err(e) => {
            warn!(registry = %registry, op = OP, "Ignoring pull secret entry: {}", e);
            None
        }
    }
}

/// Remote version of the first container image that reports one
pub async fn remote_pod_version(
    pod: &Pod,
    fetcher: &dyn ImageMetadataFetcher,
    docker_config: Option<&DockerConfig>,
) -> Result<Option<String>, RegistryError> {
    let images = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|cs| cs.image.as_str())
        .filter(|image| !image.is_empty());

    for image in images {
        let auth = auth_for_image(docker_config, image);
        if let Some(version) = fetcher.image_version(image, auth.as_ref()).await? {
            return Ok(Some(version));
        }
    }
    Ok(None)
}

/// ActiveGate pods of `dynakube`
pub async fn list_activegate_pods(
    client: &Client,
    dynakube: &DynaKube,
    op: &'static str,
) -> Result<Vec<Pod>, ReconcilerError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), &dynakube.namespace_or_default());
    let params = ListParams::default().labels(&crate::util::labels::activegate_selector(&dynakube.name_any()));
    Ok(pods
        .list(&params)
        .await
        .map_err(|e| classify_kube_error(e, op))?
        .items)
}

/// Version a pod already carries, empty labels count as missing
pub fn labeled_version(pod: &Pod) -> Option<&str> {
    pod.labels()
        .get(VERSION_LABEL)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Label the ActiveGate pods that carry no version yet
///
/// Pods that are already labeled are left alone, comparing them against the
/// registry is up to the pod updater. Returns the outcome together with the
/// first version found on an already labeled pod.
pub async fn reconcile_version_labels(
    client: &Client,
    dynakube: &DynaKube,
    fetcher: &dyn ImageMetadataFetcher,
) -> (ReconcileOutcome, Option<String>) {
    let namespace = dynakube.namespace_or_default();
    let pods = match list_activegate_pods(client, dynakube, OP).await {
        Ok(pods) => pods,
        Err(e) => return (ReconcileOutcome::report(e), None),
    };

    let running = pods.iter().find_map(labeled_version).map(str::to_string);
    let unlabeled: Vec<&Pod> = pods.iter().filter(|p| labeled_version(p).is_none()).collect();
    if unlabeled.is_empty() {
        return (ReconcileOutcome::done(), running);
    }

    let docker_config = load_pull_secret_config(client, dynakube).await;
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let mut outcome = ReconcileOutcome::done();

    for pod in unlabeled {
        let pod_name = pod.name_any();
        let version = match remote_pod_version(pod, fetcher, docker_config.as_ref()).await {
            Ok(Some(version)) => version,
            Ok(None) => {
                debug!(namespace = %namespace, pod = %pod_name, op = OP, "No image version available yet");
                continue;
            }
            Err(source) => {
                if outcome.is_ok() {
                    outcome = ReconcileOutcome::report(ReconcilerError::Registry { op: OP, source });
                }
                continue;
            }
        };
        let semver = match extract_semver(&version) {
            Ok(semver) => semver.to_string(),
            Err(e) => {
                if outcome.is_ok() {
                    outcome = ReconcileOutcome::report(ReconcilerError::Protocol {
                        op: OP,
                        message: e.to_string(),
                    });
                }
                continue;
            }
        };

        let patch = json!({
            "metadata": {
                "resourceVersion": pod.resource_version(),
                "labels": { VERSION_LABEL: semver },
            }
        });
        match api
            .patch(&pod_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(namespace = %namespace, name = %dynakube.name_any(), op = OP, pod = %pod_name, version = %semver, "Labeled pod");
            }
            Err(e) if is_conflict(&e) => {
                debug!(namespace = %namespace, pod = %pod_name, op = OP, "Pod changed while labeling, retrying soon");
                return (
                    ReconcileOutcome::halt(Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS)),
                    running,
                );
            }
            Err(e) => {
                if outcome.is_ok() {
                    outcome = ReconcileOutcome::report(classify_kube_error(e, OP));
                }
            }
        }
    }

    (outcome, running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn docker_config() -> DockerConfig {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                ByteString(
                    br#"{"auths":{"abc.example":{"username":"U","password":"P","auth":"VTpQ"},"https://index.docker.io/v1/":{"auth":"aHViOnNlY3JldA=="}}}"#
                        .to_vec(),
                ),
            )])),
            ..Secret::default()
        };
        DockerConfig::from_secret(&secret).unwrap()
    }

    #[test]
    fn test_auth_for_tenant_image() {
        let config = docker_config();
        let auth = auth_for_image(Some(&config), "abc.example/linux/activegate:1.2.3").unwrap();
        assert_eq!(auth, RegistryAuth::new("U", "P"));
    }

    #[test]
    fn test_auth_for_docker_hub_image_decodes_auth() {
        let config = docker_config();
        let auth = auth_for_image(Some(&config), "dynatrace/activegate").unwrap();
        assert_eq!(auth, RegistryAuth::new("hub", "secret"));
    }

    #[test]
    fn test_labeled_version_ignores_empty_label() {
        let mut pod = Pod::default();
        assert_eq!(labeled_version(&pod), None);
        pod.metadata.labels = Some(BTreeMap::from([(VERSION_LABEL.to_string(), String::new())]));
        assert_eq!(labeled_version(&pod), None);
        pod.metadata.labels = Some(BTreeMap::from([(VERSION_LABEL.to_string(), "1.200.0".to_string())]));
        assert_eq!(labeled_version(&pod), Some("1.200.0"));
    }

    #[test]
    fn test_no_auth_without_config_or_entry() {
        assert!(auth_for_image(None, "abc.example/linux/activegate").is_none());
        let config = docker_config();
        assert!(auth_for_image(Some(&config), "other.example/ag").is_none());
    }
}
