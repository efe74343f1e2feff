//! Tenant API operations
//!
//! Implementation of [`TenantClient`] for [`DynatraceClient`].

use super::{DynatraceClient, decode};
use crate::tenant::TenantClient;
use crate::tenant::client::requests::{KubernetesCredentialsRequest, TokenLookupRequest};
use crate::tenant::client::responses::{
    ActiveGateVersionsResponse, ActiveGatesResponse, ClusterVersionResponse,
    ConnectionInfoResponse, CredentialsResponse, LatestAgentVersionResponse, TokenLookupResponse,
};
use crate::tenant::error::TenantError;
use crate::tenant::types::{
    ActiveGate, ActiveGateQuery, ClusterInfo, ConnectionInfo, EventData, HostInfo, TenantInfo,
    TokenScopes,
};
use async_trait::async_trait;
use reqwest::Method;
use tracing::{Instrument, debug, info_span};

const CONNECTION_INFO_PATH: &str = "/v1/deployment/installer/agent/connectioninfo";

impl DynatraceClient {
    async fn connection_info_response(&self) -> Result<ConnectionInfoResponse, TenantError> {
        let request = self.make_request(Method::GET, CONNECTION_INFO_PATH, self.paas_token());
        let body = self.execute("connection_info", request).await?;
        decode("connection info", &body)
    }

    /// Cached host entry, rebuilding the cache once on a miss
    async fn host_info(&self, ip: &str) -> Result<HostInfo, TenantError> {
        if let Some(host) = self.hosts.get(ip) {
            return Ok(host);
        }
        self.refresh_hosts().await?;
        self.hosts
            .get(ip)
            .ok_or_else(|| TenantError::HostNotFound(ip.to_string()))
    }
}

#[async_trait]
impl TenantClient for DynatraceClient {
    async fn get_connection_info(&self) -> Result<ConnectionInfo, TenantError> {
        let span = info_span!("tenant.connection_info", tenant.url = %self.base_url);
        async move {
            let response = self.connection_info_response().await?;
            Ok(ConnectionInfo {
                tenant_uuid: response.tenant_uuid,
                communication_endpoints: response.communication_endpoints,
            })
        }
        .instrument(span)
        .await
    }

    async fn get_tenant_info(&self) -> Result<TenantInfo, TenantError> {
        let span = info_span!("tenant.tenant_info", tenant.url = %self.base_url);
        async move {
            let response = self.connection_info_response().await?;
            Ok(TenantInfo::new(
                response.tenant_uuid,
                response.tenant_token,
                response.communication_endpoints,
            ))
        }
        .instrument(span)
        .await
    }

    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, TenantError> {
        let span = info_span!("tenant.latest_agent_version", os = %os, installer_type = %installer_type);
        async move {
            let path = format!("/v1/deployment/installer/agent/{os}/{installer_type}/latest/metainfo");
            let request = self.make_request(Method::GET, &path, self.paas_token());
            let body = self.execute("latest_agent_version", request).await?;
            let response: LatestAgentVersionResponse = decode("latest agent version", &body)?;
            Ok(response.latest_agent_version)
        }
        .instrument(span)
        .await
    }

    async fn get_latest_active_gate_version(&self, os: &str) -> Result<String, TenantError> {
        let span = info_span!("tenant.latest_activegate_version", os = %os);
        async move {
            let path = format!("/v1/deployment/installer/gateway/versions/{os}");
            let request = self.make_request(Method::GET, &path, self.api_token());
            let body = self.execute("latest_activegate_version", request).await?;
            let response: ActiveGateVersionsResponse = decode("activegate versions", &body)?;
            response
                .available_versions
                .into_iter()
                .next()
                .ok_or(TenantError::NotFound("availableVersions"))
        }
        .instrument(span)
        .await
    }

    async fn get_agent_version_for_ip(&self, ip: &str) -> Result<String, TenantError> {
        let span = info_span!("tenant.agent_version_for_ip", ip = %ip);
        async move { self.host_info(ip).await.map(|host| host.version) }
            .instrument(span)
            .await
    }

    async fn get_entity_id_for_ip(&self, ip: &str) -> Result<String, TenantError> {
        let span = info_span!("tenant.entity_id_for_ip", ip = %ip);
        async move { self.host_info(ip).await.map(|host| host.entity_id) }
            .instrument(span)
            .await
    }

    async fn get_token_scopes(&self, token: &str) -> Result<TokenScopes, TenantError> {
        if token.is_empty() {
            return Err(TenantError::MissingToken("lookup"));
        }
        let span = info_span!("tenant.token_scopes");
        async move {
            let request = self
                .make_request(Method::POST, "/v1/tokens/lookup", token)
                .json(&TokenLookupRequest { token });
            let body = self.execute("token_scopes", request).await?;
            let response: TokenLookupResponse = decode("token lookup", &body)?;
            Ok(TokenScopes(response.scopes))
        }
        .instrument(span)
        .await
    }

    async fn send_event(&self, event: &EventData) -> Result<(), TenantError> {
        let span = info_span!("tenant.send_event", event.type = %event.event_type);
        async move {
            let request = self
                .make_request(Method::POST, "/v1/events", self.api_token())
                .json(event);
            self.execute("send_event", request).await?;
            debug!("Event sent");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn query_outdated_active_gates(
        &self,
        query: &ActiveGateQuery,
    ) -> Result<Vec<ActiveGate>, TenantError> {
        let span = info_span!("tenant.outdated_activegates", network_zone = %query.network_zone);
        async move {
            let mut params: Vec<(&str, &str)> = Vec::new();
            for (key, value) in [
                ("hostname", query.hostname.as_str()),
                ("networkAddress", query.network_address.as_str()),
                ("networkZone", query.network_zone.as_str()),
            ] {
                if !value.is_empty() {
                    params.push((key, value));
                }
            }
            params.extend([
                ("osType", "LINUX"),
                ("type", "ENVIRONMENT"),
                ("updateStatus", "OUTDATED"),
            ]);

            let request = self
                .make_request(Method::GET, "/v2/activeGates", self.api_token())
                .query(&params);
            let body = self.execute("outdated_activegates", request).await?;
            let response: ActiveGatesResponse = decode("activegates", &body)?;
            Ok(response
                .active_gates
                .into_iter()
                .filter(|gate| gate.offline_since <= 0)
                .collect())
        }
        .instrument(span)
        .await
    }

    async fn add_to_dashboard(
        &self,
        label: &str,
        endpoint: &str,
        bearer_token: &str,
    ) -> Result<String, TenantError> {
        let span = info_span!("tenant.add_to_dashboard", label = %label);
        async move {
            let request = self
                .make_request(Method::POST, "/config/v1/kubernetes/credentials", self.api_token())
                .json(&KubernetesCredentialsRequest {
                    label,
                    endpoint_url: endpoint,
                    auth_token: bearer_token,
                    active: true,
                    certificate_check_enabled: true,
                });
            let body = self.execute("add_to_dashboard", request).await?;
            let response: CredentialsResponse = decode("kubernetes credentials", &body)?;
            Ok(response.id)
        }
        .instrument(span)
        .await
    }

    async fn get_cluster_info(&self) -> Result<ClusterInfo, TenantError> {
        let span = info_span!("tenant.cluster_info", tenant.url = %self.base_url);
        async move {
            let request = self.make_request(Method::GET, "/v1/config/clusterversion", self.api_token());
            let body = self.execute("cluster_info", request).await?;
            let response: ClusterVersionResponse = decode("cluster version", &body)?;
            Ok(ClusterInfo {
                version: response.version,
            })
        }
        .instrument(span)
        .await
    }
}
