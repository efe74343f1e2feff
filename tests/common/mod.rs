//! Shared setup for the integration tests

#![allow(dead_code, reason = "not every test binary uses every helper")]

pub mod apiserver;

use std::sync::Once;

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
///
/// Matches the provider installed by the operator at startup.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}
