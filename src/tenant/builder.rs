//! # Tenant Client Builder
//!
//! Resolves the connection options of a DynaKube and builds a
//! [`DynatraceClient`].

use crate::constants::{PROXY_SECRET_KEY, TRUSTED_CAS_KEY};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::DynaKube;
use crate::tenant::client::{DynatraceClient, DynatraceClientOptions};
use crate::tenant::types::Tokens;
use crate::util::{read_config_map_key, read_secret_key};
use kube::{Client, ResourceExt};
use tracing::debug;

const OP: &str = "build_tenant_client";

/// Build the tenant client for `dynakube`
///
/// `proxy.valueFrom` and `trustedCAs` are read from the DynaKube namespace.
///
/// # Errors
/// Config errors for missing referenced objects or unusable options
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub async fn build_tenant_client(
    client: &Client,
    dynakube: &DynaKube,
    tokens: &Tokens,
) -> Result<DynatraceClient, ReconcilerError> {
    let namespace = dynakube.namespace_or_default();

    let proxy = resolve_proxy(client, &namespace, dynakube).await?;
    let trusted_certs = match dynakube.trusted_cas() {
        Some(name) => Some(
            read_config_map_key(client, &namespace, name, TRUSTED_CAS_KEY, OP)
                .await?
                .into_bytes(),
        ),
        None => None,
    };

    debug!(
        namespace = %namespace,
        name = %dynakube.name_any(),
        proxy = proxy.is_some(),
        trusted_cas = trusted_certs.is_some(),
        "Building tenant client"
    );

    let options = DynatraceClientOptions {
        skip_cert_check: dynakube.spec.skip_cert_check,
        proxy,
        trusted_certs,
        network_zone: dynakube.network_zone().map(str::to_string),
    };

    DynatraceClient::new(
        &dynakube.spec.api_url,
        &tokens.api_token,
        &tokens.paas_token,
        options,
    )
    .map_err(|e| ReconcilerError::from_tenant(OP, e))
}

/// Proxy URL from `proxy.value` or the `proxy` key of `proxy.valueFrom`
pub async fn resolve_proxy(
    client: &Client,
    namespace: &str,
    dynakube: &DynaKube,
) -> Result<Option<String>, ReconcilerError> {
    let Some(proxy) = dynakube.proxy() else {
        return Ok(None);
    };
    if let Some(value) = proxy.literal() {
        return Ok(Some(value.to_string()));
    }
    match proxy.secret_ref() {
        Some(secret) => read_secret_key(client, namespace, secret, PROXY_SECRET_KEY, OP)
            .await
            .map(|value| Some(value.trim().to_string())),
        None => Ok(None),
    }
}
