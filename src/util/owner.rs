//! # Owner References
//!
//! Children of a DynaKube carry a single controller owner reference so that
//! cascade deletion tears them down.

use crate::crd::DynaKube;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

/// Controller owner reference pointing at `dynakube`
///
/// Fails when the DynaKube has not been persisted yet (no UID).
pub fn controller_owner_ref(dynakube: &DynaKube) -> anyhow::Result<OwnerReference> {
    let mut owner = dynakube
        .controller_owner_ref(&())
        .ok_or_else(|| anyhow::anyhow!("DynaKube has no name or uid, cannot own children"))?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}
