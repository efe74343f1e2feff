//! # Types
//!
//! Core types for the reconciler.

use crate::certificates::CertError;
use crate::config::SharedControllerConfig;
use crate::registry::{ImageMetadataFetcher, RegistryError};
use crate::tenant::{TenantClientFactory, TenantError};
use crate::util::SharedClock;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_CONFLICT_REQUEUE_SECS, DEFAULT_REQUEUE_SECS, RATE_LIMIT_REQUEUE_SECS};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{op}: {what} not found")]
    NotFound { op: &'static str, what: String },
    #[error("{op}: conflicting write: {source}")]
    StoreConflict {
        op: &'static str,
        #[source]
        source: kube::Error,
    },
    #[error("{op}: kubernetes api error: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: kube::Error,
    },
    #[error("{op}: {source}")]
    Upstream {
        op: &'static str,
        #[source]
        source: TenantError,
    },
    #[error("{op}: cluster identity unavailable: {message}")]
    ClusterIdentity { op: &'static str, message: String },
    #[error("{op}: registry error: {source}")]
    Registry {
        op: &'static str,
        #[source]
        source: RegistryError,
    },
    #[error("{op}: unexpected response: {message}")]
    Protocol { op: &'static str, message: String },
    #[error("{op}: invalid configuration: {message}")]
    Config { op: &'static str, message: String },
    #[error("{op}: {source}")]
    Crypto {
        op: &'static str,
        #[source]
        source: CertError,
    },
    #[error("Reconciliation failed: {0}")]
    Fatal(#[from] anyhow::Error),
}

/// Error kind used in logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    StoreConflict,
    Store,
    Upstream,
    Protocol,
    Config,
    Crypto,
    Fatal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::StoreConflict => "store_conflict",
            ErrorKind::Store => "store",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl ReconcilerError {
    pub fn config(op: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            op,
            message: message.into(),
        }
    }

    pub fn not_found(op: &'static str, what: impl Into<String>) -> Self {
        Self::NotFound {
            op,
            what: what.into(),
        }
    }

    /// Map a tenant failure onto the matching kind
    pub fn from_tenant(op: &'static str, source: TenantError) -> Self {
        if source.is_config() {
            Self::Config {
                op,
                message: source.to_string(),
            }
        } else if source.is_protocol() {
            Self::Protocol {
                op,
                message: source.to_string(),
            }
        } else {
            Self::Upstream { op, source }
        }
    }

    pub fn from_cert(op: &'static str, source: CertError) -> Self {
        if source.is_config() {
            Self::Config {
                op,
                message: source.to_string(),
            }
        } else {
            Self::Crypto { op, source }
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StoreConflict { .. } => ErrorKind::StoreConflict,
            Self::Store { .. } => ErrorKind::Store,
            Self::Upstream { .. } | Self::ClusterIdentity { .. } | Self::Registry { .. } => {
                ErrorKind::Upstream
            }
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Config { .. } => ErrorKind::Config,
            Self::Crypto { .. } => ErrorKind::Crypto,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Operation the error happened in
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Self::NotFound { op, .. }
            | Self::StoreConflict { op, .. }
            | Self::Store { op, .. }
            | Self::Upstream { op, .. }
            | Self::ClusterIdentity { op, .. }
            | Self::Registry { op, .. }
            | Self::Protocol { op, .. }
            | Self::Config { op, .. }
            | Self::Crypto { op, .. } => op,
            Self::Fatal(_) => "reconcile",
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::StoreConflict
    }

    /// How long to wait before the next attempt
    #[must_use]
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::StoreConflict { .. } => Duration::from_secs(DEFAULT_CONFLICT_REQUEUE_SECS),
            Self::Upstream { source, .. } if source.is_rate_limited() => {
                Duration::from_secs(RATE_LIMIT_REQUEUE_SECS)
            }
            _ => Duration::from_secs(DEFAULT_REQUEUE_SECS),
        }
    }
}

/// Result of one leaf reconciler
///
/// `halt` stops the remaining leaves of the tick. Non-halting errors are
/// reported and the tick continues.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
    pub error: Option<ReconcilerError>,
    pub halt: bool,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            ..Self::default()
        }
    }

    /// Stop the tick without an error, nothing else is written
    pub fn halt(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            error: None,
            halt: true,
        }
    }

    /// Halting failure
    pub fn fail(error: ReconcilerError) -> Self {
        Self {
            requeue_after: Some(error.requeue_after()),
            error: Some(error),
            halt: true,
        }
    }

    /// Failure that is reported while the tick continues
    pub fn report(error: ReconcilerError) -> Self {
        Self {
            requeue_after: Some(error.requeue_after()),
            error: Some(error),
            halt: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<(), ReconcilerError>> for ReconcileOutcome {
    fn from(result: Result<(), ReconcilerError>) -> Self {
        match result {
            Ok(()) => Self::done(),
            Err(e) => Self::fail(e),
        }
    }
}

/// What a leaf did to the object it owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Created,
    Updated,
    Unchanged,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }

    pub fn changed(&self) -> bool {
        *self != Self::Unchanged
    }
}

/// Shared reconciler context
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub config: SharedControllerConfig,
    /// Builds a tenant client per tick from the DynaKube and its tokens
    pub tenant_factory: Arc<dyn TenantClientFactory>,
    pub registry: Arc<dyn ImageMetadataFetcher>,
    pub clock: SharedClock,
    /// Parent of the per-tick cancellation tokens
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            ReconcilerError::config("tokens", "missing").kind().as_str(),
            "config"
        );
        assert_eq!(
            ReconcilerError::not_found("dynakube", "dk").kind().as_str(),
            "not_found"
        );
        assert_eq!(
            ReconcilerError::Fatal(anyhow::anyhow!("boom")).kind().as_str(),
            "fatal"
        );
    }

    #[test]
    fn test_requeue_after() {
        let rate_limited = ReconcilerError::from_tenant(
            "connection_info",
            TenantError::Server {
                code: 429,
                message: "slow down".to_string(),
            },
        );
        assert_eq!(rate_limited.kind(), ErrorKind::Upstream);
        assert_eq!(rate_limited.requeue_after(), Duration::from_secs(60));

        let server = ReconcilerError::from_tenant(
            "connection_info",
            TenantError::Server {
                code: 500,
                message: "oops".to_string(),
            },
        );
        assert_eq!(server.requeue_after(), Duration::from_secs(300));
    }

    #[test]
    fn test_from_tenant_maps_kinds() {
        assert_eq!(
            ReconcilerError::from_tenant("build", TenantError::InvalidProxy("x".to_string()))
                .kind(),
            ErrorKind::Config
        );
        assert_eq!(
            ReconcilerError::from_tenant(
                "build",
                TenantError::Protocol {
                    what: "connectioninfo",
                    message: "eof".to_string()
                }
            )
            .kind(),
            ErrorKind::Protocol
        );
    }

    #[test]
    fn test_cluster_identity_is_upstream() {
        let err = ReconcilerError::ClusterIdentity {
            op: "statefulset",
            message: "namespace kube-system has no uid".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert_eq!(err.op(), "statefulset");
        assert_eq!(err.requeue_after(), Duration::from_secs(300));
    }

    #[test]
    fn test_outcome_constructors() {
        let outcome = ReconcileOutcome::fail(ReconcilerError::config("tokens", "missing"));
        assert!(outcome.halt);
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(300)));

        let outcome = ReconcileOutcome::report(ReconcilerError::config("dashboard", "no sa"));
        assert!(!outcome.halt);
        assert!(!outcome.is_ok());

        assert!(ReconcileOutcome::done().is_ok());
        assert_eq!(
            ReconcileOutcome::requeue(Duration::from_secs(5)).requeue_after,
            Some(Duration::from_secs(5))
        );
    }
}
