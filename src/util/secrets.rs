//! # Secrets
//!
//! Reads of user-referenced secrets and config maps, and writes of secrets
//! owned by a DynaKube. A missing referenced object or key is a
//! configuration error of the DynaKube.

use crate::controller::reconciler::{ReconcilerError, WriteAction};
use crate::util::kube_errors::classify_kube_error;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};

/// UTF-8 value of `key` in secret `name`
pub async fn read_secret_key(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
    op: &'static str,
) -> Result<String, ReconcilerError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get_opt(name)
        .await
        .map_err(|e| classify_kube_error(e, op))?
        .ok_or_else(|| ReconcilerError::config(op, format!("secret {namespace}/{name} not found")))?;
    secret_value(&secret, key)
        .ok_or_else(|| ReconcilerError::config(op, format!("secret {namespace}/{name} has no key {key}")))
}

/// Value of `key` in config map `name`
pub async fn read_config_map_key(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
    op: &'static str,
) -> Result<String, ReconcilerError> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = config_maps
        .get_opt(name)
        .await
        .map_err(|e| classify_kube_error(e, op))?
        .ok_or_else(|| {
            ReconcilerError::config(op, format!("config map {namespace}/{name} not found"))
        })?;
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .ok_or_else(|| {
            ReconcilerError::config(op, format!("config map {namespace}/{name} has no key {key}"))
        })
}

/// Create `desired`, or replace the existing secret when its data differs
///
/// The existing secret's metadata (resourceVersion included) is kept, owner
/// references and labels are taken from `desired`.
pub async fn ensure_secret(
    client: &Client,
    namespace: &str,
    desired: Secret,
    op: &'static str,
) -> Result<WriteAction, ReconcilerError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = desired.name_any();

    let existing = secrets
        .get_opt(&name)
        .await
        .map_err(|e| classify_kube_error(e, op))?;

    match existing {
        None => {
            secrets
                .create(&PostParams::default(), &desired)
                .await
                .map_err(|e| classify_kube_error(e, op))?;
            Ok(WriteAction::Created)
        }
        Some(existing) if existing.data == desired.data => Ok(WriteAction::Unchanged),
        Some(mut existing) => {
            // type is immutable
            existing.data = desired.data;
            existing.string_data = None;
            if desired.metadata.owner_references.is_some() {
                existing.metadata.owner_references = desired.metadata.owner_references;
            }
            if desired.metadata.labels.is_some() {
                existing.metadata.labels = desired.metadata.labels;
            }
            secrets
                .replace(&name, &PostParams::default(), &existing)
                .await
                .map_err(|e| classify_kube_error(e, op))?;
            Ok(WriteAction::Updated)
        }
    }
}

/// Value of `key` from `data` or `stringData`
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key))
                .cloned()
        })
}
