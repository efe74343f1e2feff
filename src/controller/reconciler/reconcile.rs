//! # Reconcile
//!
//! One tick of a DynaKube. Leaves run in a fixed order:
//!
//! 1. Load the DynaKube fresh and select the mode
//! 2. Load and check the tokens
//! 3. Version labels
//! 4. Pull secret
//! 5. With kubernetes monitoring: custom properties, stateful set, pod
//!    update, dashboard
//! 6. Arbitrate the outcomes and write the status once

use crate::constants::POD_UPDATE_COOLDOWN;
use crate::controller::custom_properties::{custom_properties_hash, reconcile_custom_properties};
use crate::controller::dashboard::reconcile_dashboard;
use crate::controller::pod_update::reconcile_pod_update;
use crate::controller::pull_secret::reconcile_pull_secret;
use crate::controller::reconciler::status::{
    apply, arbitrate, resolve_phase, token_secret_not_found, write_status,
};
use crate::controller::reconciler::tokens::{check_tokens, load_tokens};
use crate::controller::reconciler::{ReconcileOutcome, Reconciler, ReconcilerError};
use crate::controller::statefulset::reconcile_stateful_set;
use crate::controller::version_label::reconcile_version_labels;
use crate::crd::{DynaKube, DynaKubePhase, DynaKubeStatus, MonitoringMode};
use crate::observability::metrics;
use crate::util::classify_kube_error;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, info_span};

const OP: &str = "reconcile";

/// Reconcile one DynaKube
///
/// Errors are only returned for failed status writes; leaf failures are
/// recorded in the status and requeued.
pub async fn reconcile(dynakube: Arc<DynaKube>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = dynakube.name_any();
    let namespace = dynakube.namespace_or_default();
    metrics::increment_reconciliations();

    let span = info_span!(
        "dynakube.reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
    );
    let cancel = ctx.shutdown.child_token();

    let result = async {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Reconcile cancelled, retrying soon");
                metrics::increment_requeues("cancelled");
                Ok(Action::requeue(ctx.config.conflict_requeue()))
            }
            result = run_tick(&dynakube, &ctx) => result,
        }
    }
    .instrument(span)
    .await;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    result
}

/// State accumulated over one tick
struct Tick {
    dynakube: DynaKube,
    status: DynaKubeStatus,
    mode: Option<MonitoringMode>,
    outcomes: Vec<ReconcileOutcome>,
    activegate_phase: Option<DynaKubePhase>,
    now: DateTime<Utc>,
}

impl Tick {
    /// Record an outcome, returns whether the tick has to stop
    fn record(&mut self, outcome: ReconcileOutcome) -> bool {
        let halt = outcome.halt;
        self.outcomes.push(outcome);
        halt
    }
}

async fn run_tick(event: &DynaKube, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let namespace = event.namespace_or_default();
    let name = event.name_any();
    let api: Api<DynaKube> = Api::namespaced(ctx.client.clone(), &namespace);

    let Some(dynakube) = api
        .get_opt(&name)
        .await
        .map_err(|e| classify_kube_error(e, OP))?
    else {
        debug!(namespace = %namespace, name = %name, op = OP, "DynaKube is gone, nothing to do");
        return Ok(Action::await_change());
    };

    let mut tick = Tick {
        status: dynakube.status.clone().unwrap_or_default(),
        dynakube,
        mode: None,
        outcomes: Vec::new(),
        activegate_phase: None,
        now: ctx.clock.now(),
    };

    match tick.dynakube.mode() {
        Ok(mode) => tick.mode = Some(mode),
        Err(message) => {
            tick.record(ReconcileOutcome::fail(ReconcilerError::config(OP, message)));
            return finish(ctx, tick).await;
        }
    }

    run_leaves(ctx, &mut tick).await;
    finish(ctx, tick).await
}

async fn run_leaves(ctx: &Reconciler, tick: &mut Tick) {
    let client = &ctx.client;
    let namespace = tick.dynakube.namespace_or_default();
    let tokens_secret = tick.dynakube.tokens_secret_name();

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let secret = match secrets.get_opt(&tokens_secret).await {
        Ok(Some(secret)) => secret,
        Ok(None) => {
            token_secret_not_found(&mut tick.status, &tokens_secret, tick.now);
            tick.record(ReconcileOutcome::fail(ReconcilerError::not_found(
                "tokens",
                format!("secret {namespace}/{tokens_secret}"),
            )));
            return;
        }
        Err(e) => {
            tick.record(ReconcileOutcome::fail(classify_kube_error(e, "tokens")));
            return;
        }
    };
    let tokens = match load_tokens(&secret, &mut tick.status, tick.now) {
        Ok(tokens) => tokens,
        Err(e) => {
            tick.record(ReconcileOutcome::fail(e));
            return;
        }
    };

    let tenant = match ctx.tenant_factory.create(client, &tick.dynakube, &tokens).await {
        Ok(tenant) => tenant,
        Err(e) => {
            tick.record(ReconcileOutcome::fail(e));
            return;
        }
    };
    if let Err(e) = check_tokens(tenant.as_ref(), &tokens, &mut tick.status, tick.now).await {
        tick.record(ReconcileOutcome::fail(e));
        return;
    }

    // version the running pods were labeled with, not the registry's current one
    let (outcome, running) = reconcile_version_labels(client, &tick.dynakube, ctx.registry.as_ref()).await;
    if running.is_some() {
        tick.status.active_gate_image_version = running;
    }
    if tick.record(outcome) {
        return;
    }

    let outcome = reconcile_pull_secret(client, &tick.dynakube, tenant.as_ref(), &tokens).await;
    if tick.record(outcome) {
        return;
    }

    if !tick.dynakube.kubernetes_monitoring_enabled() {
        return;
    }

    let outcome = reconcile_custom_properties(client, &tick.dynakube).await;
    if tick.record(outcome) {
        return;
    }

    let properties_hash = match custom_properties_hash(client, &tick.dynakube).await {
        Ok(hash) => hash,
        Err(e) => {
            tick.record(ReconcileOutcome::fail(e));
            return;
        }
    };

    match reconcile_stateful_set(client, &tick.dynakube, tenant.as_ref(), properties_hash.as_deref()).await {
        Ok(result) => {
            tick.activegate_phase = Some(result.phase);
            if result.action.changed() {
                // pods from a fresh template are checked on the next tick
                let cooldown = chrono::Duration::from_std(POD_UPDATE_COOLDOWN)
                    .unwrap_or_else(|_| chrono::Duration::minutes(5));
                tick.status.updated_timestamp = Some(tick.now - cooldown);
            }
        }
        Err(e) => {
            tick.record(ReconcileOutcome::fail(e));
            return;
        }
    }

    if !tick.dynakube.spec.kubernetes_monitoring.disable_activegate_update {
        let outcome = reconcile_pod_update(
            client,
            &tick.dynakube,
            &mut tick.status,
            ctx.registry.as_ref(),
            tick.now,
        )
        .await;
        tick.record(outcome);
    }

    let (outcome, _) = reconcile_dashboard(client, &tick.dynakube, tenant.as_ref()).await;
    tick.record(outcome);
}

/// Stop without a status write when a leaf asked to retry soon
fn early_retry(tick: &Tick) -> Option<Action> {
    tick.outcomes
        .iter()
        .find(|o| o.halt && o.error.is_none())
        .and_then(|o| o.requeue_after)
        .map(Action::requeue)
}

async fn finish(ctx: &Reconciler, mut tick: Tick) -> Result<Action, ReconcilerError> {
    let namespace = tick.dynakube.namespace_or_default();
    let name = tick.dynakube.name_any();

    if let Some(action) = early_retry(&tick) {
        metrics::increment_requeues("conflict");
        return Ok(action);
    }

    let arbitration = arbitrate(std::mem::take(&mut tick.outcomes));
    let phase = resolve_phase(&arbitration, tick.activegate_phase);
    apply(&mut tick.status, &arbitration, phase, tick.mode, tick.now);

    if let Some(e) = &arbitration.error {
        error!(
            namespace = %namespace,
            name = %name,
            op = e.op(),
            kind = e.kind().as_str(),
            "Reconcile failed: {}", e
        );
        metrics::increment_reconciliation_errors(e.kind().as_str());
    }

    match write_status(&ctx.client, &tick.dynakube, &tick.status).await {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            debug!(namespace = %namespace, name = %name, op = OP, "Status changed concurrently, retrying soon");
            metrics::increment_requeues("conflict");
            return Ok(Action::requeue(ctx.config.conflict_requeue()));
        }
        Err(e) => return Err(e),
    }

    let requeue_after = arbitration.requeue_after.min(ctx.config.default_requeue());
    metrics::increment_requeues(if arbitration.error.is_some() { "error" } else { "scheduled" });
    info!(
        namespace = %namespace,
        name = %name,
        phase = %phase,
        requeue_secs = requeue_after.as_secs(),
        "Reconcile finished"
    );
    Ok(Action::requeue(requeue_after))
}
