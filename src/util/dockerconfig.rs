//! # Docker Config
//!
//! Parsing and building of `kubernetes.io/dockerconfigjson` pull secrets.

use crate::constants::{DOCKER_CFG_KEY, DOCKER_CONFIG_JSON_KEY};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DockerConfigError {
    #[error("secret has neither {DOCKER_CONFIG_JSON_KEY} nor {DOCKER_CFG_KEY}")]
    MissingData,
    #[error("failed to parse docker config: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to decode auth entry for {registry}")]
    InvalidAuth { registry: String },
}

/// Credentials of one registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub auth: String,
}

impl DockerAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            auth: BASE64.encode(format!("{username}:{password}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuth>,
}

impl DockerConfig {
    /// Config holding a single registry entry
    pub fn new_single(registry: &str, username: &str, password: &str) -> Self {
        Self {
            auths: BTreeMap::from([(registry.to_string(), DockerAuth::new(username, password))]),
        }
    }

    /// Parse `.dockerconfigjson`, falling back to the legacy `.dockercfg` shape
    pub fn from_secret(secret: &Secret) -> Result<Self, DockerConfigError> {
        let data = secret.data.as_ref().ok_or(DockerConfigError::MissingData)?;
        if let Some(json) = data.get(DOCKER_CONFIG_JSON_KEY) {
            return Ok(serde_json::from_slice(&json.0)?);
        }
        if let Some(legacy) = data.get(DOCKER_CFG_KEY) {
            let auths: BTreeMap<String, DockerAuth> = serde_json::from_slice(&legacy.0)?;
            return Ok(Self { auths });
        }
        Err(DockerConfigError::MissingData)
    }

    /// `(username, password)` for `registry`
    ///
    /// Entries keyed with a scheme (`https://registry`) match as well. When the
    /// username is empty the `auth` field is decoded instead.
    pub fn credentials_for(
        &self,
        registry: &str,
    ) -> Result<Option<(String, String)>, DockerConfigError> {
        let entry = self.auths.get(registry).or_else(|| {
            self.auths.iter().find_map(|(key, auth)| {
                let bare = key
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/');
                (bare == registry).then_some(auth)
            })
        });
        let Some(entry) = entry else {
            return Ok(None);
        };
        if !entry.username.is_empty() {
            return Ok(Some((entry.username.clone(), entry.password.clone())));
        }
        if entry.auth.is_empty() {
            return Ok(None);
        }
        let invalid = || DockerConfigError::InvalidAuth {
            registry: registry.to_string(),
        };
        let decoded = BASE64.decode(entry.auth.trim()).map_err(|_e| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_e| invalid())?;
        let (user, pass) = decoded.split_once(':').ok_or_else(invalid)?;
        Ok(Some((user.to_string(), pass.to_string())))
    }

    pub fn to_json(&self) -> Result<Vec<u8>, DockerConfigError> {
        Ok(serde_json::to_vec(self)?)
    }
}
