//! # ActiveGate Stateful Set
//!
//! Creates the ActiveGate stateful set of a DynaKube and replaces it when
//! the template hash of the desired object drifts from the recorded one.
//!
//! - `builder.rs` - desired object and template hash

pub mod builder;

pub use builder::{activegate_image, build_stateful_set, recorded_template_hash, template_hash};

use crate::constants::KUBE_SYSTEM_NAMESPACE;
use crate::controller::reconciler::{ReconcilerError, WriteAction};
use crate::crd::{DynaKube, DynaKubePhase};
use crate::tenant::TenantClient;
use crate::util::{classify_kube_error, controller_owner_ref};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

const OP: &str = "stateful_set";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatefulSetResult {
    pub action: WriteAction,
    pub phase: DynaKubePhase,
}

/// UID of the `kube-system` namespace, used as cluster identity
pub async fn kube_system_uid(client: &Client, op: &'static str) -> Result<String, ReconcilerError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    namespaces
        .get_opt(KUBE_SYSTEM_NAMESPACE)
        .await
        .map_err(|e| ReconcilerError::ClusterIdentity {
            op,
            message: e.to_string(),
        })?
        .and_then(|ns| ns.metadata.uid)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| ReconcilerError::ClusterIdentity {
            op,
            message: format!("namespace {KUBE_SYSTEM_NAMESPACE} has no uid"),
        })
}

/// `Running` once every desired replica is ready
pub fn phase_of(sts: &StatefulSet) -> DynaKubePhase {
    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready >= desired {
        DynaKubePhase::Running
    } else {
        DynaKubePhase::Deploying
    }
}

/// Create or replace the ActiveGate stateful set
///
/// Nothing is written unless tenant info and cluster UID are both known.
pub async fn reconcile_stateful_set(
    client: &Client,
    dynakube: &DynaKube,
    tenant: &dyn TenantClient,
    custom_properties_hash: Option<&str>,
) -> Result<StatefulSetResult, ReconcilerError> {
    let namespace = dynakube.namespace_or_default();
    let tenant_info = tenant
        .get_tenant_info()
        .await
        .map_err(|e| ReconcilerError::from_tenant(OP, e))?;
    let cluster_uid = kube_system_uid(client, OP).await?;

    let mut desired = build_stateful_set(dynakube, &tenant_info, &cluster_uid, custom_properties_hash)
        .map_err(|e| ReconcilerError::Fatal(anyhow::Error::new(e).context("serialize stateful set")))?;
    desired.metadata.owner_references = Some(vec![controller_owner_ref(dynakube)?]);
    let desired_hash = recorded_template_hash(&desired).map(str::to_string);

    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let name = desired.name_any();
    let existing = api
        .get_opt(&name)
        .await
        .map_err(|e| classify_kube_error(e, OP))?;

    let result = match existing {
        None => {
            api.create(&PostParams::default(), &desired)
                .await
                .map_err(|e| classify_kube_error(e, OP))?;
            StatefulSetResult {
                action: WriteAction::Created,
                phase: DynaKubePhase::Deploying,
            }
        }
        Some(existing) if recorded_template_hash(&existing) == desired_hash.as_deref() => {
            debug!(namespace = %namespace, name = %name, op = OP, "Stateful set up to date");
            StatefulSetResult {
                action: WriteAction::Unchanged,
                phase: phase_of(&existing),
            }
        }
        Some(existing) => {
            desired.metadata.resource_version = existing.resource_version();
            api.replace(&name, &PostParams::default(), &desired)
                .await
                .map_err(|e| classify_kube_error(e, OP))?;
            StatefulSetResult {
                action: WriteAction::Updated,
                phase: DynaKubePhase::Deploying,
            }
        }
    };

    if result.action.changed() {
        info!(
            namespace = %namespace,
            name = %name,
            op = OP,
            hash = desired_hash.as_deref().unwrap_or_default(),
            "Stateful set {}", result.action.as_str()
        );
    }
    Ok(result)
}
