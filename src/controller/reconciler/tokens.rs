//! # Tokens
//!
//! Reads the DynaKube tokens secret and checks the scopes of both tokens
//! against the tenant.
//!
//! Scope probes are throttled per token through the
//! `last*TokenProbeTimestamp` status fields; between probes the recorded
//! condition decides.

use crate::constants::{
    API_TOKEN_KEY, PAAS_TOKEN_KEY, TOKEN_PROBE_INTERVAL, TOKEN_SCOPE_DATA_EXPORT,
    TOKEN_SCOPE_INSTALLER_DOWNLOAD,
};
use crate::controller::reconciler::ReconcilerError;
use crate::crd::{
    CONDITION_API_TOKEN, CONDITION_PAAS_TOKEN, Condition, DynaKubeStatus, REASON_TOKEN_ERROR,
    REASON_TOKEN_MISSING, REASON_TOKEN_READY, REASON_TOKEN_SCOPE_MISSING,
    REASON_TOKEN_UNAUTHORIZED,
};
use crate::tenant::{TenantClient, Tokens};
use crate::util::secret_value;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

const OP: &str = "tokens";

fn read_token(secret: &Secret, key: &str) -> Result<String, ReconcilerError> {
    let value = secret_value(secret, key)
        .ok_or_else(|| ReconcilerError::config(OP, format!("tokens secret has no {key}")))?;
    if value.is_empty() {
        return Err(ReconcilerError::config(OP, format!("{key} is empty")));
    }
    if value.trim() != value {
        return Err(ReconcilerError::config(
            OP,
            format!("{key} contains leading or trailing whitespace"),
        ));
    }
    Ok(value)
}

/// Read `apiToken` and `paasToken`
///
/// Missing, empty and whitespace-padded values are rejected before any
/// tenant call is made.
pub fn parse_tokens(secret: &Secret) -> Result<Tokens, ReconcilerError> {
    let api_token = read_token(secret, API_TOKEN_KEY)?;
    let paas_token = read_token(secret, PAAS_TOKEN_KEY)?;
    Ok(Tokens::new(&api_token, &paas_token))
}

/// [`parse_tokens`], recording a `TokenMissing` condition per rejected token
pub fn load_tokens(
    secret: &Secret,
    status: &mut DynaKubeStatus,
    now: DateTime<Utc>,
) -> Result<Tokens, ReconcilerError> {
    let api_token = read_token(secret, API_TOKEN_KEY);
    let paas_token = read_token(secret, PAAS_TOKEN_KEY);
    for (result, condition_type) in [
        (&api_token, CONDITION_API_TOKEN),
        (&paas_token, CONDITION_PAAS_TOKEN),
    ] {
        if let Err(e) = result {
            status.set_condition(
                Condition::new(condition_type, false, REASON_TOKEN_MISSING, e.to_string()),
                now,
            );
        }
    }
    Ok(Tokens::new(&api_token?, &paas_token?))
}

#[derive(Debug, Clone, Copy)]
enum TokenKind {
    Api,
    Paas,
}

impl TokenKind {
    fn condition_type(self) -> &'static str {
        match self {
            Self::Api => CONDITION_API_TOKEN,
            Self::Paas => CONDITION_PAAS_TOKEN,
        }
    }

    fn required_scope(self) -> &'static str {
        match self {
            Self::Api => TOKEN_SCOPE_DATA_EXPORT,
            Self::Paas => TOKEN_SCOPE_INSTALLER_DOWNLOAD,
        }
    }

    fn last_probe(self, status: &mut DynaKubeStatus) -> &mut Option<DateTime<Utc>> {
        match self {
            Self::Api => &mut status.last_api_token_probe_timestamp,
            Self::Paas => &mut status.last_paas_token_probe_timestamp,
        }
    }
}

/// Whether a token was probed less than the probe interval ago
pub fn probe_throttled(last_probe: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let interval = chrono::Duration::from_std(TOKEN_PROBE_INTERVAL).unwrap_or_else(|_| chrono::Duration::minutes(5));
    last_probe.is_some_and(|last| now < last + interval)
}

/// Check both tokens, updating conditions and probe timestamps in `status`
///
/// Returns the first failure. A 401 or a missing scope is a configuration
/// error, any other tenant failure is upstream.
pub async fn check_tokens(
    tenant: &dyn TenantClient,
    tokens: &Tokens,
    status: &mut DynaKubeStatus,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let api = check_token(tenant, TokenKind::Api, &tokens.api_token, status, now).await;
    let paas = check_token(tenant, TokenKind::Paas, &tokens.paas_token, status, now).await;
    api.and(paas)
}

async fn check_token(
    tenant: &dyn TenantClient,
    kind: TokenKind,
    token: &str,
    status: &mut DynaKubeStatus,
    now: DateTime<Utc>,
) -> Result<(), ReconcilerError> {
    let condition_type = kind.condition_type();

    if probe_throttled(*kind.last_probe(status), now) {
        if let Some(previous) = status.condition(condition_type) {
            if !previous.is_true() {
                debug!(op = OP, condition = condition_type, "Token probe throttled, keeping failed condition");
                return Err(ReconcilerError::config(
                    OP,
                    previous.message.clone().unwrap_or_default(),
                ));
            }
            return Ok(());
        }
    }

    let scope = kind.required_scope();
    let (condition, result) = match tenant.get_token_scopes(token).await {
        Ok(scopes) => {
            let missing = scopes.missing(&[scope]);
            if missing.is_empty() {
                (Condition::new(condition_type, true, REASON_TOKEN_READY, "Ready"), Ok(()))
            } else {
                let message = format!("Token is missing scopes [{}]", missing.join(", "));
                (
                    Condition::new(condition_type, false, REASON_TOKEN_SCOPE_MISSING, &message),
                    Err(ReconcilerError::config(OP, message)),
                )
            }
        }
        Err(e) if e.is_unauthorized() => {
            let message = format!("Token is unauthorized: {e}");
            (
                Condition::new(condition_type, false, REASON_TOKEN_UNAUTHORIZED, &message),
                Err(ReconcilerError::config(OP, message)),
            )
        }
        Err(e) => (
            Condition::new(condition_type, false, REASON_TOKEN_ERROR, e.to_string()),
            Err(ReconcilerError::from_tenant(OP, e)),
        ),
    };

    status.set_condition(condition, now);
    *kind.last_probe(status) = Some(now);
    result
}
