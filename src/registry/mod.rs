//! # Registry
//!
//! Image metadata lookups against OCI / Docker v2 registries.
//!
//! The `version` label of an image config is the version reported for an
//! ActiveGate image.

pub mod client;
pub mod reference;

pub use client::RegistryClient;
pub use reference::ImageReference;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid image reference: {0:?}")]
    InvalidReference(String),
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned {code} for {url}")]
    Status { code: u16, url: String },
    #[error("registry authentication failed: {0}")]
    Unauthorized(String),
    #[error("unexpected registry response: {0}")]
    Protocol(String),
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}

/// Basic credentials for one registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl RegistryAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Reads image metadata from a registry
#[async_trait]
pub trait ImageMetadataFetcher: Send + Sync {
    /// Value of the `version` label of `image`, `None` when the label is missing
    async fn image_version(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<String>, RegistryError>;
}
