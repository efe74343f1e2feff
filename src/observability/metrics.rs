//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `dynakube_reconciliations_total` - Total number of DynaKube reconciliations
//! - `dynakube_reconciliation_errors_total` - Reconciliation errors by error kind
//! - `dynakube_reconciliation_duration_seconds` - Duration of reconciliation ticks
//! - `dynakube_requeues_total` - Requeues by reason
//! - `dynakube_tenant_requests_total` - Tenant API requests by operation and outcome
//! - `dynakube_tenant_request_duration_seconds` - Duration of tenant API requests
//! - `dynakube_pods_deleted_total` - Outdated ActiveGate pods deleted
//! - `dynakube_certificate_renewals_total` - Webhook certificate renewals by part (ca, tls)

use anyhow::Result;
use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dynakube_reconciliations_total",
        "Total number of DynaKube reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dynakube_reconciliation_errors_total",
            "Total number of reconciliation errors by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "dynakube_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("dynakube_requeues_total", "Total number of requeues by reason"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static TENANT_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dynakube_tenant_requests_total",
            "Total number of tenant API requests by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create TENANT_REQUESTS_TOTAL metric - this should never happen")
});

static TENANT_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "dynakube_tenant_request_duration_seconds",
            "Duration of tenant API requests in seconds by operation",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create TENANT_REQUEST_DURATION metric - this should never happen")
});

static PODS_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dynakube_pods_deleted_total",
        "Total number of outdated ActiveGate pods deleted",
    )
    .expect("Failed to create PODS_DELETED_TOTAL metric - this should never happen")
});

static CERTIFICATE_RENEWALS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dynakube_certificate_renewals_total",
            "Total number of webhook certificate renewals by part",
        ),
        &["part"],
    )
    .expect("Failed to create CERTIFICATE_RENEWALS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
/// Register all metrics with the private registry
///
/// Fails when called twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TENANT_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TENANT_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(PODS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATE_RENEWALS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

/// Record one tenant API request
pub fn record_tenant_request(operation: &str, outcome: &str, duration: f64) {
    TENANT_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    TENANT_REQUEST_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_pods_deleted(count: usize) {
    PODS_DELETED_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

pub fn increment_certificate_renewals(part: &str) {
    CERTIFICATE_RENEWALS_TOTAL.with_label_values(&[part]).inc();
}

/// Gather all registered metric families
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}
