//! # Certificates
//!
//! Webhook certificate lifecycle.
//!
//! - `validate.rs` - CA and serving certificate issuance and renewal
//! - `controller.rs` - Periodic controller syncing the secret, the certificate
//!   directory and the webhook `caBundle`

pub mod controller;
pub mod validate;

pub use controller::{CertControllerError, CertTickOutcome, WebhookCertController};
pub use validate::{CertBundle, CertError, CertValidator, ValidatedCerts};
