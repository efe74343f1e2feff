//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use dynakube_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Reconciler types
pub use crate::controller::reconciler::{
    ReconcileOutcome, Reconciler, ReconcilerError, WriteAction, reconcile,
};

// Config types
pub use crate::config::{ControllerConfig, LogFormat, SharedControllerConfig};

// Seams that tests and embedders replace
pub use crate::registry::{ImageMetadataFetcher, RegistryAuth, RegistryClient};
pub use crate::tenant::{TenantClient, TenantClientFactory, TenantError};
pub use crate::util::{Clock, FixedClock, SharedClock, SystemClock};

// Certificates
pub use crate::certificates::{CertBundle, CertError, CertValidator, WebhookCertController};
