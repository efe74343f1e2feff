//! # Tenant Errors

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantError {
    /// Non-2xx response from the tenant
    #[error("dynatrace server error {code}: {message}")]
    Server { code: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response body did not decode
    #[error("failed to decode {what} response: {message}")]
    Protocol { what: &'static str, message: String },
    #[error("{0} token is empty")]
    MissingToken(&'static str),
    #[error("invalid proxy url: {0}")]
    InvalidProxy(String),
    #[error("invalid trusted certificates: {0}")]
    InvalidCertificates(String),
    #[error("no host found for ip {0}")]
    HostNotFound(String),
    #[error("{0} not found in tenant response")]
    NotFound(&'static str),
}

impl TenantError {
    /// HTTP status code reported by the tenant, if any
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.server_code() == Some(401)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.server_code() == Some(429)
    }

    /// Errors caused by the DynaKube or its referenced objects
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingToken(_) | Self::InvalidProxy(_) | Self::InvalidCertificates(_)
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    error: ServerErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ServerErrorDetail {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// Decode a non-2xx body into [`TenantError::Server`]
///
/// Bodies that are not `{"error": {"code", "message"}}` keep the HTTP status
/// and the raw body as message.
pub(crate) fn server_error(status: u16, body: &str) -> TenantError {
    match serde_json::from_str::<ServerErrorBody>(body) {
        Ok(parsed) => TenantError::Server {
            code: parsed.error.code.unwrap_or(status),
            message: parsed.error.message,
        },
        Err(_e) => TenantError::Server {
            code: status,
            message: body.to_string(),
        },
    }
}
