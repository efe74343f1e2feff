//! # Observability
//!
//! Prometheus metrics of the reconcilers, the tenant client and the
//! certificate controller. Served by [`crate::server`].

pub mod metrics;
