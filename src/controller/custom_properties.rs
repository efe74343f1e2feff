//! # Custom Properties
//!
//! A literal `customProperties.value` is copied into a secret owned by the
//! DynaKube so the ActiveGate can mount it. A `valueFrom` reference is
//! mounted directly and needs no secret of its own.

use crate::constants::CUSTOM_PROPERTIES_KEY;
use crate::controller::reconciler::{ReconcileOutcome, ReconcilerError};
use crate::crd::DynaKube;
use crate::util::{controller_owner_ref, ensure_secret, fnv1_32_hex, read_secret_key};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::info;

const OP: &str = "custom_properties";

/// Secret holding a literal custom properties value
pub fn build_custom_properties_secret(
    dynakube: &DynaKube,
    value: &str,
) -> Result<Secret, ReconcilerError> {
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(dynakube.custom_properties_secret_name()),
            namespace: Some(dynakube.namespace_or_default()),
            owner_references: Some(vec![controller_owner_ref(dynakube)?]),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            CUSTOM_PROPERTIES_KEY.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    })
}

pub async fn reconcile_custom_properties(client: &Client, dynakube: &DynaKube) -> ReconcileOutcome {
    let Some(properties) = dynakube.custom_properties() else {
        return ReconcileOutcome::done();
    };
    let (Some(value), None) = (properties.literal(), properties.secret_ref()) else {
        return ReconcileOutcome::done();
    };

    let namespace = dynakube.namespace_or_default();
    let result = async {
        let desired = build_custom_properties_secret(dynakube, value)?;
        ensure_secret(client, &namespace, desired, OP).await
    }
    .await;

    match result {
        Ok(action) => {
            if action.changed() {
                info!(
                    namespace = %namespace,
                    name = %dynakube.name_any(),
                    op = OP,
                    secret = %dynakube.custom_properties_secret_name(),
                    "Custom properties secret {}", action.as_str()
                );
            }
            ReconcileOutcome::done()
        }
        Err(e) => ReconcileOutcome::fail(e),
    }
}

/// Fingerprint of the effective custom properties
///
/// Changes to the referenced secret roll the ActiveGate pods through the
/// pod template annotation.
pub async fn custom_properties_hash(
    client: &Client,
    dynakube: &DynaKube,
) -> Result<Option<String>, ReconcilerError> {
    let Some(properties) = dynakube.custom_properties() else {
        return Ok(None);
    };
    let value = match properties.secret_ref() {
        Some(secret) => {
            read_secret_key(
                client,
                &dynakube.namespace_or_default(),
                secret,
                CUSTOM_PROPERTIES_KEY,
                OP,
            )
            .await?
        }
        None => properties.literal().unwrap_or_default().to_string(),
    };
    Ok(Some(fnv1_32_hex(value.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DynaKubeSpec, DynaKubeValueSource};

    fn dynakube() -> DynaKube {
        let mut dk = DynaKube::new("dk", DynaKubeSpec::default());
        dk.metadata.namespace = Some("dynatrace".to_string());
        dk.metadata.uid = Some("uid-1".to_string());
        dk.spec.kubernetes_monitoring.custom_properties = Some(DynaKubeValueSource {
            value: Some("[connectivity]\nnetworkZone=a".to_string()),
            value_from: None,
        });
        dk
    }

    #[test]
    fn test_build_secret() {
        let dk = dynakube();
        let secret = build_custom_properties_secret(&dk, "a=b").unwrap();
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some("dk-kubernetes-monitoring-custom-properties")
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("dynatrace"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        let data = secret.data.unwrap();
        assert_eq!(data[CUSTOM_PROPERTIES_KEY].0, b"a=b");
        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners[0].uid, "uid-1");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn test_build_secret_requires_uid() {
        let mut dk = dynakube();
        dk.metadata.uid = None;
        assert!(build_custom_properties_secret(&dk, "a=b").is_err());
    }
}
