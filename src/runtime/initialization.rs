//! # Initialization
//!
//! Operator initialization: rustls setup, tracing, metrics, probe server
//! startup and Kubernetes client setup.

use crate::config::{ControllerConfig, LogFormat, SharedControllerConfig};
use crate::constants::DEFAULT_SERVER_POLL_INTERVAL_MS;
use crate::controller::reconciler::Reconciler;
use crate::observability;
use crate::registry::RegistryClient;
use crate::server::{ServerState, start_server};
use crate::tenant::DynatraceClientFactory;
use crate::util::{SharedClock, SystemClock};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Everything the watch loops need
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Shared with the probe server
    pub server_state: Arc<ServerState>,
    pub controller_config: SharedControllerConfig,
    /// Cancelled on SIGTERM/SIGINT, parent of every per-tick token
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// Installs the rustls crypto provider, sets up tracing, registers metrics,
/// starts the probe server and waits for it to bind, then creates the
/// Kubernetes client and the reconciler context.
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    let controller_config: SharedControllerConfig = Arc::new(ControllerConfig::from_env());
    init_tracing(controller_config.log_format);

    info!("Starting DynaKube operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(config = ?controller_config, "Loaded controller configuration");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });

    let server_port = controller_config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(
        &server_state,
        &server_handle,
        Duration::from_secs(controller_config.server_startup_timeout_secs),
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let registry = RegistryClient::new(controller_config.registry_plain_http)
        .context("Failed to create registry client")?;
    let shutdown = CancellationToken::new();
    let clock: SharedClock = Arc::new(SystemClock);

    let reconciler = Arc::new(Reconciler {
        client: client.clone(),
        config: Arc::clone(&controller_config),
        tenant_factory: Arc::new(DynatraceClientFactory::new(Arc::clone(&clock))),
        registry: Arc::new(registry),
        clock,
        shutdown: shutdown.clone(),
    });

    info!("Operator initialized, starting watch loops...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        controller_config,
        shutdown,
    })
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dynakube_operator=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
) -> Result<()> {
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // Set by start_server once bound
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_server_ready_returns_once_flag_set() {
        let state = Arc::new(ServerState {
            is_ready: Arc::new(AtomicBool::new(false)),
        });
        let flag = Arc::clone(&state.is_ready);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        wait_for_server_ready(&state, &handle, Duration::from_secs(2))
            .await
            .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_wait_for_server_ready_fails_when_server_exits() {
        let state = Arc::new(ServerState {
            is_ready: Arc::new(AtomicBool::new(false)),
        });
        let handle = tokio::spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = wait_for_server_ready(&state, &handle, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn test_wait_for_server_ready_times_out() {
        let state = Arc::new(ServerState {
            is_ready: Arc::new(AtomicBool::new(false)),
        });
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = wait_for_server_ready(&state, &handle, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("within"));
        handle.abort();
    }
}
