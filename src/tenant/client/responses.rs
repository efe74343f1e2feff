//! Response bodies returned by the tenant API

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ConnectionInfoResponse {
    #[serde(rename = "tenantUUID", default)]
    pub tenant_uuid: String,
    #[serde(rename = "tenantToken", default)]
    pub tenant_token: String,
    #[serde(rename = "communicationEndpoints", default)]
    pub communication_endpoints: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestAgentVersionResponse {
    pub latest_agent_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateVersionsResponse {
    #[serde(default)]
    pub available_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenLookupResponse {
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGatesResponse {
    #[serde(default)]
    pub active_gates: Vec<crate::tenant::types::ActiveGate>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialsResponse {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterVersionResponse {
    pub version: String,
}

/// Entry of `GET /v1/entity/infrastructure/hosts`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostResponse {
    pub entity_id: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default)]
    pub agent_version: Option<AgentVersion>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub last_seen_timestamp: i64,
    #[serde(default)]
    pub network_zone_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    #[serde(default)]
    pub timestamp: String,
}

impl std::fmt::Display for AgentVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.timestamp
        )
    }
}
