//! # Tenant
//!
//! Client for the Dynatrace tenant API.
//!
//! ## Module Structure
//!
//! - `client/` - reqwest implementation, request and response bodies
//! - `builder.rs` - client construction from a DynaKube (proxy, trusted CAs)
//! - `hosts.rs` - ip to host cache
//! - `types.rs` - values returned to the reconcilers
//! - `error.rs` - [`TenantError`]

pub mod builder;
pub mod client;
pub mod error;
pub mod hosts;
pub mod types;

pub use builder::build_tenant_client;
pub use client::{DynatraceClient, DynatraceClientOptions};
pub use error::TenantError;
pub use types::{
    ActiveGate, ActiveGateQuery, ClusterInfo, ConnectionInfo, EventAttachRules, EventData,
    HostInfo, TenantInfo, TokenScopes, Tokens,
};

use crate::controller::reconciler::ReconcilerError;
use crate::crd::DynaKube;
use crate::tenant::hosts::HostCache;
use crate::util::SharedClock;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Operating system path segment of installer endpoints
pub const OS_UNIX: &str = "unix";
pub const INSTALLER_TYPE_DEFAULT: &str = "default";
pub const INSTALLER_TYPE_PAAS: &str = "paas";

/// Operations against one tenant
#[async_trait]
pub trait TenantClient: Send + Sync {
    async fn get_connection_info(&self) -> Result<ConnectionInfo, TenantError>;

    /// Connection info including the tenant token
    async fn get_tenant_info(&self) -> Result<TenantInfo, TenantError>;

    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, TenantError>;

    async fn get_latest_active_gate_version(&self, os: &str) -> Result<String, TenantError>;

    async fn get_agent_version_for_ip(&self, ip: &str) -> Result<String, TenantError>;

    async fn get_entity_id_for_ip(&self, ip: &str) -> Result<String, TenantError>;

    /// Scopes of `token`, authenticated with the token itself
    async fn get_token_scopes(&self, token: &str) -> Result<TokenScopes, TenantError>;

    async fn send_event(&self, event: &EventData) -> Result<(), TenantError>;

    /// Online ActiveGates reported as outdated
    async fn query_outdated_active_gates(
        &self,
        query: &ActiveGateQuery,
    ) -> Result<Vec<ActiveGate>, TenantError>;

    /// Register cluster credentials, returns the created id
    async fn add_to_dashboard(
        &self,
        label: &str,
        endpoint: &str,
        bearer_token: &str,
    ) -> Result<String, TenantError>;

    async fn get_cluster_info(&self) -> Result<ClusterInfo, TenantError>;
}

/// Builds a tenant client for one reconcile tick
#[async_trait]
pub trait TenantClientFactory: Send + Sync {
    async fn create(
        &self,
        client: &kube::Client,
        dynakube: &DynaKube,
        tokens: &Tokens,
    ) -> Result<Arc<dyn TenantClient>, ReconcilerError>;
}

/// Identifies the tenant a host cache belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HostCacheKey {
    namespace: String,
    name: String,
    api_url: String,
    network_zone: Option<String>,
}

impl HostCacheKey {
    fn of(dynakube: &DynaKube) -> Self {
        Self {
            namespace: dynakube.namespace_or_default(),
            name: dynakube.name_any(),
            api_url: dynakube.spec.api_url.clone(),
            network_zone: dynakube.network_zone().map(str::to_string),
        }
    }
}

/// Factory producing [`DynatraceClient`]s
///
/// The HTTP client is rebuilt on every tick so that token, proxy and CA
/// changes apply right away. The host cache of a DynaKube lives as long as
/// the factory.
pub struct DynatraceClientFactory {
    clock: SharedClock,
    host_caches: Mutex<HashMap<HostCacheKey, Arc<HostCache>>>,
}

impl std::fmt::Debug for DynatraceClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynatraceClientFactory")
            .field("host_caches", &self.cached_tenants())
            .finish_non_exhaustive()
    }
}

impl DynatraceClientFactory {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            host_caches: Mutex::new(HashMap::new()),
        }
    }

    /// Host cache of `dynakube`, created on first use
    pub fn host_cache_for(&self, dynakube: &DynaKube) -> Arc<HostCache> {
        let mut caches = self
            .host_caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(caches.entry(HostCacheKey::of(dynakube)).or_default())
    }

    /// Number of tenants with a host cache
    pub fn cached_tenants(&self) -> usize {
        self.host_caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl TenantClientFactory for DynatraceClientFactory {
    async fn create(
        &self,
        client: &kube::Client,
        dynakube: &DynaKube,
        tokens: &Tokens,
    ) -> Result<Arc<dyn TenantClient>, ReconcilerError> {
        let tenant = build_tenant_client(client, dynakube, tokens)
            .await?
            .with_host_cache(self.host_cache_for(dynakube))
            .with_clock(Arc::clone(&self.clock));
        Ok(Arc::new(tenant))
    }
}
