//! # Controller
//!
//! Leaf reconcilers of a DynaKube and the reconciler composing them.
//!
//! - `version_label`: `version` labels on ActiveGate pods
//! - `pull_secret`: tenant registry pull secret
//! - `custom_properties`: secret for literal custom properties
//! - `statefulset`: ActiveGate stateful set
//! - `pod_update`: deletion of outdated ActiveGate pods
//! - `dashboard`: kubernetes API registration with the tenant
//! - `reconciler`: per-tick composition and status handling

pub mod custom_properties;
pub mod dashboard;
pub mod pod_update;
pub mod pull_secret;
pub mod reconciler;
pub mod statefulset;
pub mod version_label;
