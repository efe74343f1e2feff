//! # Dynatrace Client
//!
//! REST client for the tenant API of a Dynatrace environment.
//!
//! - Uses reqwest with rustls (no OpenSSL dependencies)
//! - Works directly with Pact HTTP mock servers, the API URL is the only
//!   endpoint it talks to
//! - Every request authenticates with `Authorization: Api-Token <token>`

mod operations;
mod requests;
mod responses;

pub use requests::*;
pub use responses::*;

use crate::observability::metrics;
use crate::tenant::error::{TenantError, server_error};
use crate::tenant::hosts::{HostCache, build_host_map};
use crate::util::{SharedClock, SystemClock};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Certificate, Client, Method, Proxy};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

/// Connection options derived from the DynaKube
#[derive(Debug, Clone, Default)]
pub struct DynatraceClientOptions {
    pub skip_cert_check: bool,
    pub proxy: Option<String>,
    /// Concatenated PEM bundle added to the trusted roots
    pub trusted_certs: Option<Vec<u8>>,
    pub network_zone: Option<String>,
}

/// Dynatrace tenant REST client
pub struct DynatraceClient {
    http_client: Client,
    base_url: String,
    api_token: Zeroizing<String>,
    paas_token: Zeroizing<String>,
    network_zone: Option<String>,
    hosts: Arc<HostCache>,
    clock: SharedClock,
}

impl std::fmt::Debug for DynatraceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynatraceClient")
            .field("base_url", &self.base_url)
            .field("network_zone", &self.network_zone)
            .finish_non_exhaustive()
    }
}

impl DynatraceClient {
    /// Create a client for `api_url` (for example `https://abc.live.dynatrace.com/api`)
    ///
    /// # Errors
    /// Returns [`TenantError::MissingToken`] for an empty token,
    /// [`TenantError::InvalidProxy`] or [`TenantError::InvalidCertificates`]
    /// for unusable options.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn new(
        api_url: &str,
        api_token: &str,
        paas_token: &str,
        options: DynatraceClientOptions,
    ) -> Result<Self, TenantError> {
        if api_token.is_empty() {
            return Err(TenantError::MissingToken("api"));
        }
        if paas_token.is_empty() {
            return Err(TenantError::MissingToken("paas"));
        }

        let mut builder = Client::builder().danger_accept_invalid_certs(options.skip_cert_check);

        if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = Proxy::all(proxy).map_err(|e| TenantError::InvalidProxy(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        if let Some(pem) = options.trusted_certs.as_deref() {
            let certs = Certificate::from_pem_bundle(pem)
                .map_err(|e| TenantError::InvalidCertificates(e.to_string()))?;
            if certs.is_empty() {
                return Err(TenantError::InvalidCertificates(
                    "bundle contains no certificates".to_string(),
                ));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let http_client = builder.build()?;

        Ok(Self {
            http_client,
            base_url: api_url.trim_end_matches('/').to_string(),
            api_token: Zeroizing::new(api_token.to_string()),
            paas_token: Zeroizing::new(paas_token.to_string()),
            network_zone: options.network_zone.filter(|z| !z.is_empty()),
            hosts: Arc::new(HostCache::default()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Share `hosts` with other clients of the same tenant
    #[must_use]
    pub fn with_host_cache(mut self, hosts: Arc<HostCache>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Time source for the staleness check of cached hosts
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Build HTTP request with authentication headers
    pub(crate) fn make_request(
        &self,
        method: Method,
        path: &str,
        token: &str,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.http_client
            .request(method, url)
            .header(AUTHORIZATION, format!("Api-Token {token}"))
            .header(ACCEPT, "application/json")
    }

    /// Send the request and return the body of a 200/201 response
    pub(crate) async fn execute(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>, TenantError> {
        let start = Instant::now();
        let result = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            if status == 200 || status == 201 {
                Ok(body.to_vec())
            } else {
                Err(server_error(status, &String::from_utf8_lossy(&body)))
            }
        }
        .await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        metrics::record_tenant_request(operation, outcome, start.elapsed().as_secs_f64());
        result
    }

    pub(crate) fn api_token(&self) -> &str {
        self.api_token.as_str()
    }

    pub(crate) fn paas_token(&self) -> &str {
        self.paas_token.as_str()
    }

    /// Rebuild the host cache from a full host listing
    pub(crate) async fn refresh_hosts(&self) -> Result<(), TenantError> {
        let request = self
            .make_request(Method::GET, "/v1/entity/infrastructure/hosts", self.api_token())
            .query(&[("includeDetails", "false")]);
        let body = self.execute("hosts", request).await?;
        let hosts: Vec<HostResponse> = decode("hosts", &body)?;
        let map = build_host_map(
            hosts,
            self.network_zone.as_deref(),
            self.clock.now().timestamp_millis(),
        );
        debug!(hosts = map.len(), "Rebuilt host cache");
        self.hosts.replace(map);
        Ok(())
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    what: &'static str,
    body: &[u8],
) -> Result<T, TenantError> {
    serde_json::from_slice(body).map_err(|e| TenantError::Protocol {
        what,
        message: e.to_string(),
    })
}
