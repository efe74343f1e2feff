//! # Configuration
//!
//! Operator-level settings loaded from environment variables.

mod controller;

pub use controller::{ControllerConfig, LogFormat};

use std::sync::Arc;

/// Configuration shared between the reconcilers and the runtime
pub type SharedControllerConfig = Arc<ControllerConfig>;
