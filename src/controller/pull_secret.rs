//! # Pull Secret
//!
//! Maintains `<dynakube>-pull-secret`, a `kubernetes.io/dockerconfigjson`
//! secret granting access to the tenant registry.
//!
//! The username is the tenant UUID, the password the PaaS token.

use crate::constants::{DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE};
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError, WriteAction};
use crate::crd::DynaKube;
use crate::tenant::{TenantClient, Tokens};
use crate::util::{DockerConfig, controller_owner_ref, ensure_secret};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

const OP: &str = "pull_secret";

/// Registry host of the tenant: `apiUrl` without scheme and `/api` suffix
pub fn registry_from_api_url(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme
        .strip_suffix("/api")
        .unwrap_or(without_scheme)
        .to_string()
}

/// `.dockerconfigjson` data of the pull secret
pub fn build_pull_secret_data(
    registry: &str,
    tenant_uuid: &str,
    paas_token: &str,
) -> Result<BTreeMap<String, ByteString>, ReconcilerError> {
    let json = DockerConfig::new_single(registry, tenant_uuid, paas_token)
        .to_json()
        .map_err(|e| ReconcilerError::Fatal(anyhow::Error::new(e).context("encode docker config")))?;
    Ok(BTreeMap::from([(
        DOCKER_CONFIG_JSON_KEY.to_string(),
        ByteString(json),
    )]))
}

/// A user-supplied pull secret or image takes precedence over the generated one
pub fn is_user_supplied(dynakube: &DynaKube) -> bool {
    dynakube.custom_pull_secret().is_some() || dynakube.custom_activegate_image().is_some()
}

pub async fn reconcile_pull_secret(
    client: &Client,
    dynakube: &DynaKube,
    tenant: &dyn TenantClient,
    tokens: &Tokens,
) -> ReconcileOutcome {
    match ensure_pull_secret(client, dynakube, tenant, tokens).await {
        Ok(_) => ReconcileOutcome::done(),
        Err(e) => ReconcileOutcome::fail(e),
    }
}

async fn ensure_pull_secret(
    client: &Client,
    dynakube: &DynaKube,
    tenant: &dyn TenantClient,
    tokens: &Tokens,
) -> Result<Option<WriteAction>, ReconcilerError> {
    let namespace = dynakube.namespace_or_default();
    if is_user_supplied(dynakube) {
        debug!(namespace = %namespace, name = %dynakube.name_any(), op = OP, "User-supplied pull secret or image, skipping");
        return Ok(None);
    }

    let connection_info = tenant
        .get_connection_info()
        .await
        .map_err(|e| ReconcilerError::from_tenant(OP, e))?;

    let registry = registry_from_api_url(&dynakube.spec.api_url);
    let data = build_pull_secret_data(&registry, &connection_info.tenant_uuid, &tokens.paas_token)?;
    let owner = controller_owner_ref(dynakube)?;

    let desired = Secret {
        metadata: ObjectMeta {
            name: Some(dynakube.generated_pull_secret_name()),
            namespace: Some(namespace.clone()),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(data),
        ..Secret::default()
    };

    let action = ensure_secret(client, &namespace, desired, OP).await?;
    if action.changed() {
        info!(
            namespace = %namespace,
            name = %dynakube.name_any(),
            op = OP,
            action = action.as_str(),
            "Pull secret {}", action.as_str()
        );
    }
    Ok(Some(action))
}
