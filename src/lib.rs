//! DynaKube Operator Library
//!
//! Reconcilers, tenant and registry clients, and the webhook certificate
//! controller behind the `dynakube-operator` binary.
//!
//! ## Quick Start
//!
//! ```rust
//! use dynakube_operator::prelude::*;
//! ```

pub mod certificates;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod tenant;
pub mod util;
