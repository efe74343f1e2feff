//! # Error Policy
//!
//! Requeue policy for failed reconciles and classification of watch stream
//! errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::DynaKube;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Requeue a DynaKube whose reconcile returned an error
///
/// Only failed status writes and unexpected failures reach this point; leaf
/// failures are recorded in the status by the reconcile itself.
pub fn handle_reconciliation_error(
    obj: Arc<DynaKube>,
    error: &ReconcilerError,
    _ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error.kind = error.kind().as_str(),
        error.op = error.op(),
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    metrics::increment_reconciliation_errors(error.kind().as_str());

    let after = error.requeue_after();
    metrics::increment_requeues("error");
    Action::requeue(after)
}

/// How a watch stream error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    NotFound,
    Unauthorized,
    Expired,
    Throttled,
    Other,
}

/// Classify a watch error by its debug rendering
///
/// 404 is checked before 401: a plain-text 404 surfaces as a decode error
/// that also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::Throttled
    } else if is_not_found {
        WatchErrorClass::NotFound
    } else {
        WatchErrorClass::Other
    }
}

/// Handle a watch stream error
///
/// Returns `None` to drop the event and let the watch restart, `Some(())`
/// to pass it on.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &AtomicU64,
    max_backoff_ms: u64,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired"
            );
            error!("Check the operator ClusterRole, its binding and the service account token");
            warn!(
                "Waiting {}s before retrying watch...",
                watch_restart_delay.as_secs()
            );
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorClass::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorClass::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server throttling watch (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorClass::NotFound => {
            warn!(
                "Resource not found (404), normal after deletions or while the CRD is missing. Error: {}",
                error_string
            );
            Some(())
        }
        WatchErrorClass::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("WatchFailed(Api(ErrorResponse { code: 401, reason: \"Unauthorized\" }))"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed(invalid type: integer `404`)"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (456)"),
            WatchErrorClass::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorClass::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorClass::Other);
    }

    #[tokio::test]
    async fn test_throttled_watch_doubles_backoff_up_to_max() {
        let backoff = AtomicU64::new(10);
        let kept = handle_watch_stream_error("429 TooManyRequests", &backoff, 30, Duration::ZERO).await;
        assert!(kept.is_none());
        assert_eq!(backoff.load(Ordering::Relaxed), 20);

        handle_watch_stream_error("429 TooManyRequests", &backoff, 30, Duration::ZERO).await;
        assert_eq!(backoff.load(Ordering::Relaxed), 30);
    }

    #[tokio::test]
    async fn test_not_found_passes_event_on() {
        let backoff = AtomicU64::new(10);
        let kept = handle_watch_stream_error("ObjectNotFound", &backoff, 30, Duration::ZERO).await;
        assert_eq!(kept, Some(()));
        assert_eq!(backoff.load(Ordering::Relaxed), 10);
    }
}
