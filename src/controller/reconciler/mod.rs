//! # Reconciler
//!
//! Top-level reconciliation of `DynaKube` resources.
//!
//! The reconciler composes the leaf reconcilers in a fixed order, folds
//! their outcomes into one requeue and one error, and writes the status once
//! per tick.

pub mod reconcile;
pub mod status;
pub mod tokens;
pub mod types;

// Re-export public API
pub use reconcile::reconcile;
pub use status::{Arbitration, arbitrate, resolve_phase};
pub use tokens::{check_tokens, load_tokens, parse_tokens};
pub use types::{ErrorKind, ReconcileOutcome, Reconciler, ReconcilerError, WriteAction};
