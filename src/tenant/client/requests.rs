//! Request bodies sent to the tenant API

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TokenLookupRequest<'a> {
    pub token: &'a str,
}

/// Body of `POST /config/v1/kubernetes/credentials`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesCredentialsRequest<'a> {
    pub label: &'a str,
    pub endpoint_url: &'a str,
    pub auth_token: &'a str,
    pub active: bool,
    pub certificate_check_enabled: bool,
}
