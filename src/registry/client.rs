//! # Registry Client
//!
//! Docker Registry HTTP API v2 client reading image config labels.
//!
//! Flow: manifest (resolving an index to linux/amd64), then the config blob.
//! Credentials are sent as basic auth; a `Bearer` challenge is answered with
//! a token from the advertised realm.

use crate::registry::reference::{DOCKER_HUB_REGISTRY, ImageReference};
use crate::registry::{ImageMetadataFetcher, RegistryAuth, RegistryError};
use crate::constants::IMAGE_VERSION_LABEL;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{Instrument, debug, info_span};

const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    #[serde(default)]
    os: String,
    #[serde(default)]
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: Option<ImageConfigDetails>,
}

#[derive(Debug, Deserialize)]
struct ImageConfigDetails {
    #[serde(default, rename = "Labels")]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Registry client shared by all reconciles
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http_client: Client,
    plain_http: bool,
}

impl RegistryClient {
    /// `plain_http` talks HTTP instead of HTTPS (test registries)
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn new(plain_http: bool) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .build()
            .context("Failed to create registry HTTP client")?;
        Ok(Self {
            http_client,
            plain_http,
        })
    }

    fn base_url(&self, registry: &str) -> String {
        let scheme = if self.plain_http { "http" } else { "https" };
        format!("{scheme}://{registry}")
    }

    /// Labels of the image config
    pub async fn image_labels(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let span = info_span!("registry.image_labels", image = %reference);
        async move {
            let mut session = Session::new(self, &reference, auth);

            let mut manifest: Manifest = session
                .get_json(&format!("manifests/{}", reference.reference), manifest_accept())
                .await?;

            if is_index(&manifest) {
                let digest = select_platform(&manifest.manifests)?;
                debug!(digest = %digest, "Resolved image index");
                manifest = session
                    .get_json(&format!("manifests/{digest}"), manifest_accept())
                    .await?;
            }

            let config_digest = manifest
                .config
                .map(|c| c.digest)
                .ok_or_else(|| RegistryError::Protocol("manifest has no config".to_string()))?;

            let blob = session
                .get_bytes(&format!("blobs/{config_digest}"), "*/*")
                .await?;
            verify_digest(&config_digest, &blob)?;

            let config: ImageConfig = serde_json::from_slice(&blob)
                .map_err(|e| RegistryError::Protocol(format!("image config: {e}")))?;
            Ok(config
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default())
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl ImageMetadataFetcher for RegistryClient {
    async fn image_version(
        &self,
        image: &str,
        auth: Option<&RegistryAuth>,
    ) -> Result<Option<String>, RegistryError> {
        let labels = self.image_labels(image, auth).await?;
        Ok(labels
            .get(IMAGE_VERSION_LABEL)
            .filter(|v| !v.is_empty())
            .cloned())
    }
}

/// Requests against one repository, remembering an acquired bearer token
struct Session<'a> {
    client: &'a RegistryClient,
    repository_url: String,
    repository: &'a str,
    auth: Option<&'a RegistryAuth>,
    bearer: Option<String>,
}

impl<'a> Session<'a> {
    fn new(client: &'a RegistryClient, reference: &'a ImageReference, auth: Option<&'a RegistryAuth>) -> Self {
        Self {
            client,
            repository_url: format!(
                "{}/v2/{}",
                client.base_url(&reference.registry),
                reference.repository
            ),
            repository: &reference.repository,
            auth,
            bearer: None,
        }
    }

    fn request(&self, url: &str, accept: &str) -> RequestBuilder {
        let request = self.client.http_client.get(url).header(ACCEPT, accept);
        match (&self.bearer, self.auth) {
            (Some(token), _) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            (None, Some(auth)) => request.basic_auth(&auth.username, Some(&auth.password)),
            (None, None) => request,
        }
    }

    async fn get_bytes(&mut self, path: &str, accept: &str) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/{}", self.repository_url, path);
        let mut response = self.request(&url, accept).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.bearer.is_none() {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(challenge) = challenge.as_deref().and_then(BearerChallenge::parse) {
                self.bearer = Some(self.fetch_token(&challenge).await?);
                response = self.request(&url, accept).send().await?;
            }
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RegistryError::Unauthorized(url));
        }
        if !status.is_success() {
            return Err(RegistryError::Status {
                code: status.as_u16(),
                url,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &mut self,
        path: &str,
        accept: &str,
    ) -> Result<T, RegistryError> {
        let body = self.get_bytes(path, accept).await?;
        serde_json::from_slice(&body).map_err(|e| RegistryError::Protocol(format!("{path}: {e}")))
    }

    async fn fetch_token(&self, challenge: &BearerChallenge) -> Result<String, RegistryError> {
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));
        let mut query = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }

        let mut request = self.client.http_client.get(&challenge.realm).query(&query);
        if let Some(auth) = self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Unauthorized(format!(
                "token endpoint {} returned {}",
                challenge.realm,
                response.status().as_u16()
            )));
        }
        let body = response.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::Protocol(format!("token response: {e}")))?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Protocol("token response without token".to_string()))
    }
}

/// Parsed `WWW-Authenticate: Bearer realm="..",service="..",scope=".."`
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

impl BearerChallenge {
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for param in split_params(params) {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// Split on commas outside quotes (scopes contain commas)
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&params[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

fn manifest_accept() -> &'static str {
    "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json"
}

fn is_index(manifest: &Manifest) -> bool {
    match manifest.media_type.as_deref() {
        Some(MANIFEST_LIST_V2 | OCI_INDEX) => true,
        Some(MANIFEST_V2 | OCI_MANIFEST) => false,
        _ => manifest.config.is_none() && !manifest.manifests.is_empty(),
    }
}

/// linux/amd64 entry of an index, else the first one
fn select_platform(manifests: &[Descriptor]) -> Result<&str, RegistryError> {
    manifests
        .iter()
        .find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| manifests.first())
        .map(|m| m.digest.as_str())
        .ok_or_else(|| RegistryError::Protocol("image index is empty".to_string()))
}

/// Check `sha256:` digests; other algorithms are not verified
fn verify_digest(expected: &str, body: &[u8]) -> Result<(), RegistryError> {
    let Some(hex) = expected.strip_prefix("sha256:") else {
        return Ok(());
    };
    let actual = format!("{:x}", Sha256::digest(body));
    if actual.eq_ignore_ascii_case(hex) {
        Ok(())
    } else {
        Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("sha256:{actual}"),
        })
    }
}

/// Registry a DockerConfig entry is looked up under
pub fn auth_registry(image: &str) -> Option<String> {
    ImageReference::parse(image).ok().map(|r| {
        if r.registry == DOCKER_HUB_REGISTRY {
            "https://index.docker.io/v1/".to_string()
        } else {
            r.registry
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.example/token",service="registry.example",scope="repository:linux/activegate:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.example/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:linux/activegate:pull,push"));

        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse("Bearer service=\"x\"").is_none());
    }

    #[test]
    fn test_verify_digest() {
        let body = b"{}";
        let digest = format!("sha256:{:x}", Sha256::digest(body));
        assert!(verify_digest(&digest, body).is_ok());
        assert!(matches!(
            verify_digest(&digest, b"[]"),
            Err(RegistryError::DigestMismatch { .. })
        ));
        assert!(verify_digest("sha512:abc", body).is_ok());
    }

    #[test]
    fn test_select_platform() {
        let manifests: Vec<Descriptor> = serde_json::from_value(serde_json::json!([
            {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64"}},
            {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}}
        ]))
        .unwrap();
        assert_eq!(select_platform(&manifests).unwrap(), "sha256:amd");
        assert_eq!(select_platform(&manifests[..1]).unwrap(), "sha256:arm");
        assert!(select_platform(&[]).is_err());
    }

    #[test]
    fn test_auth_registry() {
        assert_eq!(
            auth_registry("abc.live.dynatrace.com/linux/activegate:1.0").as_deref(),
            Some("abc.live.dynatrace.com")
        );
        assert_eq!(
            auth_registry("busybox").as_deref(),
            Some("https://index.docker.io/v1/")
        );
    }
}
