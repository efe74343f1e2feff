//! # Custom Resource Definitions
//!
//! CRD types for the DynaKube operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - DynaKube specification, mode selection and name helpers
//! - `status.rs` - Status types, phases and condition handling

mod spec;
mod status;

// Re-export all public types
pub use spec::{
    ApplicationMonitoringSpec, DynaKube, DynaKubeProxy, DynaKubeSpec, DynaKubeValueSource,
    HostInjectSpec, KubernetesMonitoringSpec, MonitoringMode, OneAgentSpec,
};
pub use status::{
    CONDITION_API_TOKEN, CONDITION_MODE, CONDITION_PAAS_TOKEN, CONDITION_READY, Condition,
    DynaKubePhase, DynaKubeStatus, REASON_RECONCILE_FAILED, REASON_RECONCILED,
    REASON_TOKEN_ERROR, REASON_TOKEN_MISSING, REASON_TOKEN_READY, REASON_TOKEN_SCOPE_MISSING,
    REASON_TOKEN_SECRET_NOT_FOUND, REASON_TOKEN_UNAUTHORIZED,
};
