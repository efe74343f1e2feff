//! # DynaKube Operator
//!
//! Watches DynaKube resources and reconciles them into ActiveGate stateful
//! sets, pull secrets and dashboards, and keeps the webhook certificates
//! valid.

use dynakube_operator::runtime::{
    initialize, run_cert_loop, run_watch_loop, spawn_shutdown_handler,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let init = initialize().await?;

    let signal_handle =
        spawn_shutdown_handler(std::sync::Arc::clone(&init.server_state), init.shutdown.clone());
    let cert_handle = run_cert_loop(
        init.client.clone(),
        std::sync::Arc::clone(&init.controller_config),
        &init.reconciler,
        &init.shutdown,
    );

    let result = run_watch_loop(
        init.client.clone(),
        std::sync::Arc::clone(&init.reconciler),
        std::sync::Arc::clone(&init.controller_config),
        init.shutdown.clone(),
    )
    .await;

    // The watch loop also ends on its own signal handling, stop the rest with it
    init.shutdown.cancel();
    if let Some(handle) = cert_handle {
        if let Err(e) = handle.await {
            error!("Webhook certificate controller task failed: {}", e);
        }
    }
    signal_handle.abort();

    info!("DynaKube operator stopped");
    result
}
