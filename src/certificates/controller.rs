//! # Webhook Certificate Controller
//!
//! Keeps the webhook TLS material in sync, independent of any DynaKube.
//!
//! Each tick:
//! 1. Loads the certificate secret (missing secret means an empty bundle)
//! 2. Validates and renews the bundle
//! 3. Creates or updates the secret when the data changed
//! 4. Mirrors `tls.crt` / `tls.key` into the certificate directory
//! 5. Sets the `caBundle` of every webhook in the webhook configurations
//!
//! Ticks run on an interval and on every watch event of the webhook service.

use crate::certificates::validate::{CertBundle, CertError, CertValidator, ValidatedCerts};
use crate::config::SharedControllerConfig;
use crate::constants::{CA_CERT_KEY, TLS_CERT_KEY, TLS_KEY_KEY};
use crate::observability::metrics;
use crate::util::{SharedClock, is_not_found};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{ObjectMeta, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Error)]
pub enum CertControllerError {
    #[error("{op}: kubernetes api error: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: kube::Error,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error("certificate generation task failed: {0}")]
    Task(String),
}

/// Result of one tick
#[derive(Debug)]
pub struct CertTickOutcome {
    pub requeue_after: Duration,
    pub ca_changed: bool,
    pub tls_changed: bool,
    pub error: Option<CertControllerError>,
}

/// Webhook TLS material as written by a tick
#[derive(Debug, Clone, Copy, Default)]
struct TickChanges {
    ca_changed: bool,
    tls_changed: bool,
}

#[derive(Clone)]
pub struct WebhookCertController {
    client: Client,
    config: SharedControllerConfig,
    validator: CertValidator,
    clock: SharedClock,
}

impl std::fmt::Debug for WebhookCertController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookCertController")
            .field("namespace", &self.config.operator_namespace)
            .field("secret", &self.config.webhook_cert_secret_name())
            .finish_non_exhaustive()
    }
}

impl WebhookCertController {
    pub fn new(
        client: Client,
        config: SharedControllerConfig,
        validator: CertValidator,
        clock: SharedClock,
    ) -> Self {
        Self {
            client,
            config,
            validator,
            clock,
        }
    }

    fn service_events(&self) -> BoxStream<'static, Result<watcher::Event<Service>, watcher::Error>> {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.config.operator_namespace);
        let watch_config = watcher::Config::default()
            .fields(&format!("metadata.name={}", self.config.webhook_service_name));
        watcher(services, watch_config).default_backoff().boxed()
    }

    /// Run ticks until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut service_events = self.service_events();
        let mut interval = tokio::time::interval(self.config.cert_tick_interval());

        info!(
            namespace = %self.config.operator_namespace,
            service = %self.config.webhook_service_name,
            "Starting webhook certificate controller"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick_until(&shutdown).await;
                }
                event = service_events.next() => match event {
                    Some(Ok(watcher::Event::Apply(_) | watcher::Event::InitApply(_) | watcher::Event::Delete(_))) => {
                        debug!("Webhook service changed, validating certificates");
                        self.tick_until(&shutdown).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Webhook service watch error: {}", e);
                    }
                    None => {
                        warn!("Webhook service watch stream ended, restarting");
                        if !wait_unless_cancelled(&shutdown, self.config.watch_restart_delay_duration()).await {
                            break;
                        }
                        service_events = self.service_events();
                    }
                },
            }
        }
        info!("Webhook certificate controller stopped");
    }

    /// Tick under a child of `shutdown`, abandoned when it is cancelled
    async fn tick_until(&self, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Webhook certificate tick cancelled");
            }
            _ = self.tick(self.clock.now()) => {}
        }
    }

    /// One validation pass at `now`
    ///
    /// Always requeues after the tick interval, failures included.
    pub async fn tick(&self, now: DateTime<Utc>) -> CertTickOutcome {
        let span = info_span!(
            "certificates.tick",
            namespace = %self.config.operator_namespace,
            secret = %self.config.webhook_cert_secret_name(),
        );
        let result = self.sync(now).instrument(span).await;
        let requeue_after = self.config.cert_tick_interval();
        match result {
            Ok(changes) => CertTickOutcome {
                requeue_after,
                ca_changed: changes.ca_changed,
                tls_changed: changes.tls_changed,
                error: None,
            },
            Err(e) => {
                error!(op = "webhook_certs", "Webhook certificate tick failed: {}", e);
                CertTickOutcome {
                    requeue_after,
                    ca_changed: false,
                    tls_changed: false,
                    error: Some(e),
                }
            }
        }
    }

    async fn sync(&self, now: DateTime<Utc>) -> Result<TickChanges, CertControllerError> {
        let namespace = &self.config.operator_namespace;
        let secret_name = self.config.webhook_cert_secret_name();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let existing = secrets
            .get_opt(&secret_name)
            .await
            .map_err(|source| CertControllerError::Store {
                op: "get_cert_secret",
                source,
            })?;
        let current = existing
            .as_ref()
            .and_then(|s| s.data.as_ref())
            .map(CertBundle::from_secret_data);

        let validated = self.validate(current.clone(), now).await?;
        if validated.ca_changed {
            metrics::increment_certificate_renewals("ca");
        }
        if validated.tls_changed {
            metrics::increment_certificate_renewals("tls");
        }

        let data = validated.bundle.to_secret_data();
        match existing {
            None => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(secret_name.clone()),
                        namespace: Some(namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    type_: Some("Opaque".to_string()),
                    data: Some(data),
                    ..Secret::default()
                };
                secrets
                    .create(&PostParams::default(), &secret)
                    .await
                    .map_err(|source| CertControllerError::Store {
                        op: "create_cert_secret",
                        source,
                    })?;
                info!("Created webhook certificate secret {}", secret_name);
            }
            Some(mut secret) if current.as_ref() != Some(&validated.bundle) => {
                secret.data = Some(data);
                secrets
                    .replace(&secret_name, &PostParams::default(), &secret)
                    .await
                    .map_err(|source| CertControllerError::Store {
                        op: "update_cert_secret",
                        source,
                    })?;
                info!("Updated webhook certificate secret {}", secret_name);
            }
            Some(_) => {
                debug!("Webhook certificate secret is up to date");
            }
        }

        write_certs_dir(&self.config.certs_dir, &validated.bundle).await?;

        if let Some(ca) = validated.bundle.get(CA_CERT_KEY) {
            self.sync_mutating_ca_bundle(ca).await?;
            self.sync_validating_ca_bundle(ca).await?;
        }

        Ok(TickChanges {
            ca_changed: validated.ca_changed,
            tls_changed: validated.tls_changed,
        })
    }

    /// RSA key generation is CPU bound
    async fn validate(
        &self,
        current: Option<CertBundle>,
        now: DateTime<Utc>,
    ) -> Result<ValidatedCerts, CertControllerError> {
        let validator = self.validator;
        let domain = self.config.webhook_domain();
        tokio::task::spawn_blocking(move || validator.validate(current.as_ref(), &domain, now))
            .await
            .map_err(|e| CertControllerError::Task(e.to_string()))?
            .map_err(CertControllerError::from)
    }

    async fn sync_mutating_ca_bundle(&self, ca: &[u8]) -> Result<(), CertControllerError> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        let name = &self.config.webhook_service_name;
        let Some(mut config) = get_webhook_config(&api, name, "get_mutating_webhook").await? else {
            return Ok(());
        };
        let changed = config
            .webhooks
            .iter_mut()
            .flatten()
            .fold(false, |changed, webhook| {
                set_ca_bundle(&mut webhook.client_config.ca_bundle, ca) || changed
            });
        if changed {
            api.replace(name, &PostParams::default(), &config)
                .await
                .map_err(|source| CertControllerError::Store {
                    op: "update_mutating_webhook",
                    source,
                })?;
            info!("Updated caBundle of mutating webhook configuration {}", name);
        }
        Ok(())
    }

    async fn sync_validating_ca_bundle(&self, ca: &[u8]) -> Result<(), CertControllerError> {
        let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
        let name = &self.config.webhook_service_name;
        let Some(mut config) = get_webhook_config(&api, name, "get_validating_webhook").await?
        else {
            return Ok(());
        };
        let changed = config
            .webhooks
            .iter_mut()
            .flatten()
            .fold(false, |changed, webhook| {
                set_ca_bundle(&mut webhook.client_config.ca_bundle, ca) || changed
            });
        if changed {
            api.replace(name, &PostParams::default(), &config)
                .await
                .map_err(|source| CertControllerError::Store {
                    op: "update_validating_webhook",
                    source,
                })?;
            info!("Updated caBundle of validating webhook configuration {}", name);
        }
        Ok(())
    }
}

/// Sleep for `delay`, returns `false` when `shutdown` fired first
async fn wait_unless_cancelled(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Missing configurations are logged and skipped
async fn get_webhook_config<K>(
    api: &Api<K>,
    name: &str,
    op: &'static str,
) -> Result<Option<K>, CertControllerError>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(config) => Ok(Some(config)),
        Err(e) if is_not_found(&e) => {
            info!("Webhook configuration {} not found, retrying later", name);
            Ok(None)
        }
        Err(source) => Err(CertControllerError::Store { op, source }),
    }
}

/// Returns whether the bundle changed
fn set_ca_bundle(ca_bundle: &mut Option<ByteString>, ca: &[u8]) -> bool {
    if ca_bundle.as_ref().is_some_and(|b| b.0 == ca) {
        return false;
    }
    *ca_bundle = Some(ByteString(ca.to_vec()));
    true
}

/// Write `tls.crt` and `tls.key` into `dir` when their content differs
pub async fn write_certs_dir(dir: &Path, bundle: &CertBundle) -> Result<bool, CertControllerError> {
    let mut written = false;
    for key in [TLS_CERT_KEY, TLS_KEY_KEY] {
        let Some(content) = bundle.get(key) else {
            continue;
        };
        written |= write_if_changed(&dir.join(key), content).await?;
    }
    Ok(written)
}

async fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool, CertControllerError> {
    let io_err = |source: std::io::Error| CertControllerError::Io {
        path: path.to_path_buf(),
        source,
    };
    if tokio::fs::read(path)
        .await
        .is_ok_and(|current| current == content)
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(path, content).await.map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
            .await
            .map_err(io_err)?;
    }
    debug!("Wrote {}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CA_KEY_KEY;

    fn bundle() -> CertBundle {
        let mut bundle = CertBundle::default();
        bundle.insert(CA_CERT_KEY, b"ca".to_vec());
        bundle.insert(CA_KEY_KEY, b"ca-key".to_vec());
        bundle.insert(TLS_CERT_KEY, b"cert".to_vec());
        bundle.insert(TLS_KEY_KEY, b"key".to_vec());
        bundle
    }

    #[tokio::test]
    async fn test_write_certs_dir_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("nested").join("certs");

        assert!(write_certs_dir(&certs, &bundle()).await.unwrap());
        assert_eq!(std::fs::read(certs.join(TLS_CERT_KEY)).unwrap(), b"cert");
        assert_eq!(std::fs::read(certs.join(TLS_KEY_KEY)).unwrap(), b"key");
        assert!(!certs.join(CA_KEY_KEY).exists());

        assert!(!write_certs_dir(&certs, &bundle()).await.unwrap());

        let mut renewed = bundle();
        renewed.insert(TLS_CERT_KEY, b"cert-2".to_vec());
        assert!(write_certs_dir(&certs, &renewed).await.unwrap());
        assert_eq!(std::fs::read(certs.join(TLS_CERT_KEY)).unwrap(), b"cert-2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        write_certs_dir(dir.path(), &bundle()).await.unwrap();
        let mode = std::fs::metadata(dir.path().join(TLS_KEY_KEY))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o666);
    }

    #[tokio::test]
    async fn test_restart_wait_ends_on_shutdown() {
        let shutdown = CancellationToken::new();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { wait_unless_cancelled(&shutdown, Duration::from_secs(3600)).await }
        });
        shutdown.cancel();
        let finished = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("wait should end as soon as shutdown fires")
            .unwrap();
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_restart_wait_elapses() {
        let shutdown = CancellationToken::new();
        assert!(wait_unless_cancelled(&shutdown, Duration::from_millis(10)).await);
    }

    #[test]
    fn test_set_ca_bundle() {
        let mut ca_bundle = None;
        assert!(set_ca_bundle(&mut ca_bundle, b"ca"));
        assert!(!set_ca_bundle(&mut ca_bundle, b"ca"));
        assert!(set_ca_bundle(&mut ca_bundle, b"other"));
        assert_eq!(ca_bundle, Some(ByteString(b"other".to_vec())));
    }
}
