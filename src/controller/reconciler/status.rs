//! # Status
//!
//! Folds leaf outcomes into one result, derives the phase and writes the
//! status of a DynaKube.

use crate::constants::{DEFAULT_REQUEUE_SECS, FIELD_MANAGER};
use crate::controller::reconciler::{ErrorKind, ReconcileOutcome, ReconcilerError};
use crate::crd::{
    CONDITION_API_TOKEN, CONDITION_MODE, CONDITION_READY, Condition, DynaKube, DynaKubePhase,
    DynaKubeStatus, MonitoringMode, REASON_RECONCILE_FAILED, REASON_RECONCILED,
    REASON_TOKEN_SECRET_NOT_FOUND,
};
use crate::util::classify_kube_error;
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const OP: &str = "status";

/// Combined result of the leaves of one tick
#[derive(Debug)]
pub struct Arbitration {
    /// Smallest requeue asked for, capped at the regular interval
    pub requeue_after: Duration,
    /// First error reported by a leaf
    pub error: Option<ReconcilerError>,
    /// Whether a leaf stopped the tick with an error
    pub halted: bool,
}

pub fn arbitrate(outcomes: impl IntoIterator<Item = ReconcileOutcome>) -> Arbitration {
    let mut arbitration = Arbitration {
        requeue_after: Duration::from_secs(DEFAULT_REQUEUE_SECS),
        error: None,
        halted: false,
    };
    for outcome in outcomes {
        if let Some(after) = outcome.requeue_after {
            arbitration.requeue_after = arbitration.requeue_after.min(after);
        }
        if outcome.halt && outcome.error.is_some() {
            arbitration.halted = true;
        }
        if arbitration.error.is_none() {
            arbitration.error = outcome.error;
        }
    }
    arbitration
}

/// Phase after a tick
///
/// Halting and configuration errors put the DynaKube into `Error`. Otherwise
/// the ActiveGate decides, or `Running` when there is none.
pub fn resolve_phase(arbitration: &Arbitration, activegate_phase: Option<DynaKubePhase>) -> DynaKubePhase {
    let config_error = arbitration
        .error
        .as_ref()
        .is_some_and(|e| e.kind() == ErrorKind::Config);
    if arbitration.halted || config_error {
        DynaKubePhase::Error
    } else {
        activegate_phase.unwrap_or(DynaKubePhase::Running)
    }
}

/// Record phase, `Ready` and `Mode` in `status`
pub fn apply(
    status: &mut DynaKubeStatus,
    arbitration: &Arbitration,
    phase: DynaKubePhase,
    mode: Option<MonitoringMode>,
    now: DateTime<Utc>,
) {
    status.phase = Some(phase);
    let ready = match &arbitration.error {
        Some(e) => {
            Condition::new(CONDITION_READY, false, REASON_RECONCILE_FAILED, e.to_string())
        }
        _ => Condition::new(CONDITION_READY, true, REASON_RECONCILED, ""),
    };
    status.set_condition(ready, now);
    if let Some(mode) = mode {
        status.set_condition(Condition::new(CONDITION_MODE, true, mode.as_str(), ""), now);
    }
}

/// Condition recorded while the tokens secret is absent
pub fn token_secret_not_found(status: &mut DynaKubeStatus, secret: &str, now: DateTime<Utc>) {
    status.set_condition(
        Condition::new(
            CONDITION_API_TOKEN,
            false,
            REASON_TOKEN_SECRET_NOT_FOUND,
            format!("secret {secret} not found"),
        ),
        now,
    );
}

/// Write `status` when it differs from the stored one
///
/// The patch carries the resourceVersion the DynaKube was read at, so a
/// concurrent write surfaces as a store conflict.
pub async fn write_status(
    client: &Client,
    dynakube: &DynaKube,
    status: &DynaKubeStatus,
) -> Result<bool, ReconcilerError> {
    if dynakube.status.as_ref() == Some(status) {
        debug!(
            namespace = %dynakube.namespace_or_default(),
            name = %dynakube.name_any(),
            op = OP,
            "Status unchanged, skipping write"
        );
        return Ok(false);
    }

    let api: Api<DynaKube> = Api::namespaced(client.clone(), &dynakube.namespace_or_default());
    let patch = json!({
        "metadata": { "resourceVersion": dynakube.resource_version() },
        "status": status,
    });
    api.patch_status(
        &dynakube.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(|e| classify_kube_error(e, OP))?;
    Ok(true)
}
