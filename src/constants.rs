//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Intervals and ports can be overridden via environment variables
//! (see [`crate::config::ControllerConfig`]); names and keys are part of
//! the on-cluster contract and are fixed.

use std::time::Duration;

/// Field manager used for server-side writes
pub const FIELD_MANAGER: &str = "dynakube-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default namespace the operator runs in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "dynatrace";

/// Regular requeue interval, also the ceiling for leaf requeues
pub const DEFAULT_REQUEUE_SECS: u64 = 300;

/// Requeue interval after an optimistic-concurrency conflict
pub const DEFAULT_CONFLICT_REQUEUE_SECS: u64 = 5;

/// Requeue interval when the tenant API rate limits us (HTTP 429)
pub const RATE_LIMIT_REQUEUE_SECS: u64 = 60;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

// Webhook certificates

/// Name of the webhook service, deployment and webhook configurations
pub const WEBHOOK_NAME: &str = "dynatrace-webhook";

/// Suffix of the secret holding the webhook TLS material
pub const WEBHOOK_CERT_SECRET_SUFFIX: &str = "-certs";

/// Directory the webhook server reads `tls.crt` and `tls.key` from
pub const DEFAULT_CERTS_DIR: &str = "/tmp/webhook/certs";

/// Interval of the webhook certificate controller
pub const DEFAULT_CERT_TICK_INTERVAL_SECS: u64 = 300;

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

/// How long before NotAfter a certificate is renewed
pub const CERT_RENEWAL_THRESHOLD: Duration = Duration::from_secs(4 * 60 * 60);

/// Validity of the self-signed CA
pub const CA_VALIDITY_DAYS: i64 = 365;

/// Validity of the serving certificate
pub const TLS_VALIDITY_DAYS: i64 = 7;

/// RSA modulus size for CA and serving keys
pub const DEFAULT_RSA_KEY_BITS: usize = 4096;

// Tokens

/// Key of the API token in the tokens secret
pub const API_TOKEN_KEY: &str = "apiToken";

/// Key of the PaaS token in the tokens secret
pub const PAAS_TOKEN_KEY: &str = "paasToken";

/// Minimum time between two scope probes of the same token
pub const TOKEN_PROBE_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const TOKEN_SCOPE_INSTALLER_DOWNLOAD: &str = "InstallerDownload";
pub const TOKEN_SCOPE_DATA_EXPORT: &str = "DataExport";

// Pull secret, proxy, trusted CAs

/// Suffix of the generated pull secret
pub const PULL_SECRET_SUFFIX: &str = "-pull-secret";

/// Data key of a `kubernetes.io/dockerconfigjson` secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Data key of a legacy `kubernetes.io/dockercfg` secret
pub const DOCKER_CFG_KEY: &str = ".dockercfg";

pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Key of the proxy URL in a proxy secret
pub const PROXY_SECRET_KEY: &str = "proxy";

/// Key of the PEM bundle in the trusted CA config map
pub const TRUSTED_CAS_KEY: &str = "certs";

// Custom properties

pub const CUSTOM_PROPERTIES_SUFFIX: &str = "-custom-properties";
pub const CUSTOM_PROPERTIES_KEY: &str = "customProperties";
pub const CUSTOM_PROPERTIES_PATH: &str = "custom.properties";
pub const CUSTOM_PROPERTIES_VOLUME: &str = "custom-properties";
pub const CUSTOM_PROPERTIES_MOUNT_PATH: &str = "/mnt/dynatrace/gateway/config";

/// Component name used for kubernetes monitoring owned objects
pub const KUBERNETES_MONITORING_COMPONENT: &str = "kubernetes-monitoring";

// ActiveGate stateful set

/// Annotation holding the FNV-32 fingerprint of the desired stateful set
pub const TEMPLATE_HASH_ANNOTATION: &str = "internal.activegate.dynatrace.com/template-hash";

/// Pod template annotation holding the fingerprint of the custom properties
pub const CUSTOM_PROPERTIES_HASH_ANNOTATION: &str =
    "internal.activegate.dynatrace.com/custom-properties-hash";

pub const ACTIVEGATE_CONTAINER_NAME: &str = "dynatrace-operator";
pub const ACTIVEGATE_IMAGE_PATH: &str = "linux/activegate";
pub const MONITORING_SERVICE_ACCOUNT: &str = "dynatrace-kubernetes-monitoring";
pub const DEFAULT_CPU_REQUEST: &str = "100m";
pub const ACTIVEGATE_PROBE_PORT: i32 = 9999;

pub const DT_TENANT: &str = "DT_TENANT";
pub const DT_TOKEN: &str = "DT_TOKEN";
pub const DT_SERVER: &str = "DT_SERVER";
pub const DT_CAPABILITIES: &str = "DT_CAPABILITIES";
pub const DT_ID_SEED_NAMESPACE: &str = "DT_ID_SEED_NAMESPACE";
pub const DT_ID_SEED_K8S_CLUSTER_ID: &str = "DT_ID_SEED_K8S_CLUSTER_ID";
pub const KUBERNETES_MONITORING_CAPABILITY: &str = "kubernetes_monitoring";

pub const PROXY_ENV: &str = "ACTIVE_GATE_PROXY";
pub const PROXY_ARG: &str = r#"PROXY="${ACTIVE_GATE_PROXY}""#;

// Pod update

/// Pod label carrying the detected agent version
pub const VERSION_LABEL: &str = "version";

/// Remote image label carrying the agent version
pub const IMAGE_VERSION_LABEL: &str = "version";

/// Cooldown between two pod-update passes
pub const POD_UPDATE_COOLDOWN: Duration = Duration::from_secs(5 * 60);

// Dashboard

/// Key of the bearer token in a service account token secret
pub const BEARER_TOKEN_KEY: &str = "token";

/// Namespace whose UID identifies the cluster
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
