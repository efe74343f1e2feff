//! # Watch Loop
//!
//! Controller loop that watches DynaKube resources, and the stateful sets
//! they own, and triggers a reconcile on every change. Also starts the
//! webhook certificate controller next to it.

use crate::certificates::{CertValidator, WebhookCertController};
use crate::config::SharedControllerConfig;
use crate::controller::reconciler::{Reconciler, ReconcilerError, reconcile};
use crate::crd::DynaKube;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use crate::server::ServerState;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Api, Client, ResourceExt};
use kube_runtime::{Controller, controller::Action, watcher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Mark the server as not ready and cancel `shutdown` on SIGTERM or SIGINT
pub fn spawn_shutdown_handler(
    server_state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.is_ready.store(false, Ordering::Relaxed);
        shutdown.cancel();
        info!("Marked server as not ready, cancelling in-flight reconciles...");
    })
}

async fn wait_for_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler, only SIGINT is handled: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// Start the webhook certificate controller when it is enabled
pub fn run_cert_loop(
    client: Client,
    config: SharedControllerConfig,
    reconciler: &Reconciler,
    shutdown: &CancellationToken,
) -> Option<JoinHandle<()>> {
    if !config.enable_webhook_certs {
        info!("Webhook certificate controller disabled");
        return None;
    }
    let controller = WebhookCertController::new(
        client,
        config,
        CertValidator::default(),
        Arc::clone(&reconciler.clock),
    );
    let token = shutdown.child_token();
    Some(tokio::spawn(async move { controller.run(token).await }))
}

/// Run the DynaKube controller until `shutdown` is cancelled
///
/// The watch is restarted when its stream ends or fails.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    controller_config: SharedControllerConfig,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let dynakubes: Api<DynaKube> = Api::all(client.clone());
    let stateful_sets: Api<StatefulSet> = Api::all(client);
    let backoff_duration_ms = Arc::new(AtomicU64::new(controller_config.backoff_start_ms));

    loop {
        if shutdown.is_cancelled() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let backoff = Arc::clone(&backoff_duration_ms);
        let config = Arc::clone(&controller_config);
        let watch_span = info_span!("controller.watch", operation = "watch_loop");

        info!("Starting controller watch loop...");
        Controller::new(dynakubes.clone(), watcher::Config::default().any_semantic())
            .owns(stateful_sets.clone(), watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile_traced, handle_reconciliation_error, Arc::clone(&reconciler))
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                let config = Arc::clone(&config);
                async move {
                    match &x {
                        Ok(_) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!("watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if shutdown.is_cancelled() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config.watch_restart_delay_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

async fn reconcile_traced(
    obj: Arc<DynaKube>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let span = info_span!(
        "controller.watch.reconcile",
        resource.name = %name,
        resource.namespace = %obj.namespace_or_default(),
        resource.version = obj.resource_version().as_deref().unwrap_or("unknown"),
        resource.generation = obj.metadata.generation.unwrap_or(0),
    );

    async move {
        debug!("watch.event.received");
        let result = reconcile(obj, ctx).await;
        match &result {
            Ok(action) => debug!(action = ?action, "watch.event.reconciled"),
            Err(e) => error!(resource.name = %name, error = %e, "watch.event.reconciliation_failed"),
        }
        result
    }
    .instrument(span)
    .await
}
