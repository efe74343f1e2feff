//! # Tenant Types
//!
//! Values exchanged with the tenant. None of them are persisted.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub tenant_uuid: String,
    pub communication_endpoints: Vec<String>,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct TenantInfo {
    pub id: String,
    pub token: String,
    pub endpoints: Vec<String>,
    /// First communication endpoint, empty when there is none
    pub communication_endpoint: String,
}

impl TenantInfo {
    pub fn new(id: String, token: String, endpoints: Vec<String>) -> Self {
        let communication_endpoint = endpoints.first().cloned().unwrap_or_default();
        Self {
            id,
            token,
            endpoints,
            communication_endpoint,
        }
    }
}

impl std::fmt::Debug for TenantInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantInfo")
            .field("id", &self.id)
            .field("token", &"***")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Tokens from the DynaKube tokens secret
#[derive(Clone)]
pub struct Tokens {
    pub api_token: Zeroizing<String>,
    pub paas_token: Zeroizing<String>,
}

impl Tokens {
    pub fn new(api_token: &str, paas_token: &str) -> Self {
        Self {
            api_token: Zeroizing::new(api_token.to_string()),
            paas_token: Zeroizing::new(paas_token.to_string()),
        }
    }
}

impl std::fmt::Debug for Tokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokens")
            .field("api_token", &"***")
            .field("paas_token", &"***")
            .finish()
    }
}

/// Scopes granted to a token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScopes(pub Vec<String>);

impl TokenScopes {
    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    /// Required scopes not granted
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|scope| !self.contains(scope))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAttachRules {
    pub entity_ids: Vec<String>,
}

/// Body of `POST /v1/events`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub event_type: String,
    pub description: String,
    pub source: String,
    pub attach_rules: EventAttachRules,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
}

/// Filter for outdated ActiveGates, empty fields are not sent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveGateQuery {
    pub hostname: String,
    pub network_address: String,
    pub network_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGate {
    pub id: String,
    #[serde(default)]
    pub network_addresses: Vec<String>,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub auto_update_status: String,
    /// Epoch millis, `<= 0` means online
    #[serde(default)]
    pub offline_since: i64,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub network_zone: String,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub version: String,
    pub entity_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_info_communication_endpoint() {
        let info = TenantInfo::new(
            "U".to_string(),
            "T".to_string(),
            vec!["https://comm/".to_string(), "https://other/".to_string()],
        );
        assert_eq!(info.communication_endpoint, "https://comm/");
        assert_eq!(TenantInfo::new(String::new(), String::new(), vec![]).communication_endpoint, "");
        assert!(!format!("{info:?}").contains("\"T\""));
    }

    #[test]
    fn test_missing_scopes() {
        let scopes = TokenScopes(vec!["DataExport".to_string()]);
        assert!(scopes.missing(&["DataExport"]).is_empty());
        assert_eq!(scopes.missing(&["InstallerDownload", "DataExport"]), vec!["InstallerDownload"]);
    }

    #[test]
    fn test_event_serialization() {
        let event = EventData {
            event_type: "MARKED_FOR_TERMINATION".to_string(),
            description: "ActiveGate pod deleted".to_string(),
            source: "dynakube-operator".to_string(),
            attach_rules: EventAttachRules {
                entity_ids: vec!["HOST-1".to_string()],
            },
            timeout_minutes: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "MARKED_FOR_TERMINATION");
        assert_eq!(json["attachRules"]["entityIds"][0], "HOST-1");
        assert!(json.get("timeoutMinutes").is_none());
    }
}
