//! # Runtime
//!
//! Process wiring around the reconcilers.
//!
//! - `initialization.rs` - rustls, tracing, metrics, probe server and client setup
//! - `watch_loop.rs` - DynaKube controller loop and the webhook certificate loop
//! - `error_policy.rs` - Reconcile error requeues and watch stream error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{InitializationResult, initialize};
pub use watch_loop::{run_cert_loop, run_watch_loop, spawn_shutdown_handler};
