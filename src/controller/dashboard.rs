//! # Dashboard
//!
//! Registers the cluster's kubernetes API endpoint with the tenant, using
//! the bearer token of the ActiveGate service account. Registration
//! failures are logged and never fail the reconcile.

use crate::constants::{BEARER_TOKEN_KEY, DEFAULT_REQUEUE_SECS};
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError};
use crate::crd::DynaKube;
use crate::tenant::{TenantClient, TenantError};
use crate::util::{classify_kube_error, read_secret_key, sanitize_label};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::{Api, Client, ResourceExt};
use std::time::Duration;
use tracing::{error, info};

const OP: &str = "dashboard";

/// Label unique per DynaKube and endpoint
pub fn build_dashboard_label(namespace: &str, name: &str, endpoint: &str) -> String {
    let host = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint)
        .replace(':', "_");
    sanitize_label(&format!("{namespace}-{name}-{host}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardOutcome {
    Registered(String),
    AlreadyExists,
    Failed(String),
}

pub fn handle_dashboard_result(
    result: Result<String, TenantError>,
    namespace: &str,
    name: &str,
) -> DashboardOutcome {
    match result {
        Ok(id) => {
            info!(namespace = %namespace, name = %name, op = OP, id = %id, "Registered kubernetes monitoring dashboard");
            DashboardOutcome::Registered(id)
        }
        Err(e) if e.server_code() == Some(400) => {
            info!(namespace = %namespace, name = %name, op = OP, "Dashboard not registered, configuration may already exist: {}", e);
            DashboardOutcome::AlreadyExists
        }
        Err(e) => {
            error!(namespace = %namespace, name = %name, op = OP, kind = "upstream", "Failed to register dashboard: {}", e);
            DashboardOutcome::Failed(e.to_string())
        }
    }
}

/// Bearer token of the ActiveGate service account
pub async fn service_account_token(client: &Client, dynakube: &DynaKube) -> Result<String, ReconcilerError> {
    let namespace = dynakube.namespace_or_default();
    let account = dynakube.monitoring_service_account();
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), &namespace);
    let service_account = accounts
        .get_opt(&account)
        .await
        .map_err(|e| classify_kube_error(e, OP))?
        .ok_or_else(|| ReconcilerError::config(OP, format!("service account {namespace}/{account} not found")))?;

    let secret = service_account
        .secrets
        .as_ref()
        .and_then(|secrets| secrets.first())
        .and_then(|secret| secret.name.as_deref())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            ReconcilerError::config(OP, format!("service account {namespace}/{account} has no token secret"))
        })?;

    read_secret_key(client, &namespace, secret, BEARER_TOKEN_KEY, OP).await
}

/// Register the dashboard when an API endpoint is configured
pub async fn reconcile_dashboard(
    client: &Client,
    dynakube: &DynaKube,
    tenant: &dyn TenantClient,
) -> (ReconcileOutcome, Option<DashboardOutcome>) {
    let Some(endpoint) = dynakube.kubernetes_api_endpoint() else {
        return (ReconcileOutcome::done(), None);
    };
    let namespace = dynakube.namespace_or_default();
    let name = dynakube.name_any();

    let token = match service_account_token(client, dynakube).await {
        Ok(token) => token,
        Err(e) => {
            error!(namespace = %namespace, name = %name, op = OP, kind = e.kind().as_str(), "Cannot register dashboard: {}", e);
            return (
                ReconcileOutcome::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECS)),
                None,
            );
        }
    };

    let label = build_dashboard_label(&namespace, &name, endpoint);
    let result = tenant.add_to_dashboard(&label, endpoint, &token).await;
    (
        ReconcileOutcome::done(),
        Some(handle_dashboard_result(result, &namespace, &name)),
    )
}
