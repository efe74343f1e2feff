//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator is deployed in
    /// Holds the webhook service, its certificate secret and the webhook configurations
    pub operator_namespace: String,
    /// Name of the webhook service (also used for the webhook configurations)
    pub webhook_service_name: String,
    /// Directory the webhook server reads its serving certificate from
    pub certs_dir: PathBuf,
    /// Whether the webhook certificate controller runs in this process
    pub enable_webhook_certs: bool,
    /// Interval of the webhook certificate controller (seconds)
    pub cert_tick_interval_secs: u64,
    /// Regular requeue interval (seconds)
    /// Also the upper bound for requeues requested by leaf reconcilers
    pub default_requeue_secs: u64,
    /// Requeue interval after an optimistic-concurrency conflict (seconds)
    pub conflict_requeue_secs: u64,
    /// Exponential backoff starting value for the watch stream (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value for the watch stream (milliseconds)
    pub backoff_max_ms: u64,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Metrics and probe server port
    pub metrics_port: u16,
    /// How long to wait for the HTTP server to bind (seconds)
    pub server_startup_timeout_secs: u64,
    /// Talk plain HTTP to container registries (test registries only)
    pub registry_plain_http: bool,
    /// Log format (json, text)
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            webhook_service_name: WEBHOOK_NAME.to_string(),
            certs_dir: PathBuf::from(DEFAULT_CERTS_DIR),
            enable_webhook_certs: true,
            cert_tick_interval_secs: DEFAULT_CERT_TICK_INTERVAL_SECS,
            default_requeue_secs: DEFAULT_REQUEUE_SECS,
            conflict_requeue_secs: DEFAULT_CONFLICT_REQUEUE_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            registry_plain_http: false,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", DEFAULT_OPERATOR_NAMESPACE),
            webhook_service_name: env_var_or_default_str("WEBHOOK_SERVICE_NAME", WEBHOOK_NAME),
            certs_dir: PathBuf::from(env_var_or_default_str("CERTS_DIR", DEFAULT_CERTS_DIR)),
            enable_webhook_certs: env_var_or_default_bool("ENABLE_WEBHOOK_CERTS", true),
            cert_tick_interval_secs: env_var_or_default(
                "CERT_TICK_INTERVAL_SECS",
                DEFAULT_CERT_TICK_INTERVAL_SECS,
            ),
            default_requeue_secs: env_var_or_default("DEFAULT_REQUEUE_SECS", DEFAULT_REQUEUE_SECS),
            conflict_requeue_secs: env_var_or_default(
                "CONFLICT_REQUEUE_SECS",
                DEFAULT_CONFLICT_REQUEUE_SECS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            registry_plain_http: env_var_or_default_bool("REGISTRY_PLAIN_HTTP", false),
            log_format: LogFormat::parse(&env_var_or_default_str("LOG_FORMAT", "text")),
        }
    }

    /// Domain the webhook serving certificate is issued for
    pub fn webhook_domain(&self) -> String {
        format!("{}.{}.svc", self.webhook_service_name, self.operator_namespace)
    }

    /// Name of the secret holding the webhook certificates
    pub fn webhook_cert_secret_name(&self) -> String {
        format!(
            "{}{}",
            self.webhook_service_name,
            crate::constants::WEBHOOK_CERT_SECRET_SUFFIX
        )
    }

    /// Get default requeue duration
    pub fn default_requeue(&self) -> Duration {
        Duration::from_secs(self.default_requeue_secs)
    }

    /// Get conflict requeue duration
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.conflict_requeue_secs)
    }

    /// Get webhook certificate controller interval
    pub fn cert_tick_interval(&self) -> Duration {
        Duration::from_secs(self.cert_tick_interval_secs)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.default_requeue(), Duration::from_secs(300));
        assert_eq!(config.conflict_requeue(), Duration::from_secs(5));
        assert_eq!(config.cert_tick_interval(), Duration::from_secs(300));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_webhook_names() {
        let config = ControllerConfig {
            operator_namespace: "dt".to_string(),
            ..ControllerConfig::default()
        };
        assert_eq!(config.webhook_domain(), "dynatrace-webhook.dt.svc");
        assert_eq!(config.webhook_cert_secret_name(), "dynatrace-webhook-certs");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Text);
    }
}
