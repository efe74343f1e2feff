//! # DynaKube Status
//!
//! Status types for tracking reconciliation state and conditions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Condition type for the API token check
pub const CONDITION_API_TOKEN: &str = "APIToken";
/// Condition type for the PaaS token check
pub const CONDITION_PAAS_TOKEN: &str = "PaaSToken";
/// Condition type mirroring the result of the last reconcile
pub const CONDITION_READY: &str = "Ready";
/// Condition type recording the selected operating mode
pub const CONDITION_MODE: &str = "Mode";

pub const REASON_TOKEN_READY: &str = "TokenReady";
pub const REASON_TOKEN_MISSING: &str = "TokenMissing";
pub const REASON_TOKEN_UNAUTHORIZED: &str = "TokenUnauthorized";
pub const REASON_TOKEN_SCOPE_MISSING: &str = "TokenScopeMissing";
pub const REASON_TOKEN_ERROR: &str = "TokenError";
pub const REASON_TOKEN_SECRET_NOT_FOUND: &str = "TokenSecretNotFound";
pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Phase of a DynaKube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum DynaKubePhase {
    Running,
    Deploying,
    Error,
}

impl DynaKubePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Deploying => "Deploying",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for DynaKubePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the DynaKube resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeStatus {
    /// Values: Running, Deploying, Error
    #[serde(default)]
    pub phase: Option<DynaKubePhase>,
    /// Last time outdated ActiveGate pods were looked for (RFC3339)
    #[serde(default)]
    pub updated_timestamp: Option<DateTime<Utc>>,
    /// Last scope probe of the API token (RFC3339)
    #[serde(default, rename = "lastAPITokenProbeTimestamp")]
    pub last_api_token_probe_timestamp: Option<DateTime<Utc>>,
    /// Last scope probe of the PaaS token (RFC3339)
    #[serde(default, rename = "lastPaaSTokenProbeTimestamp")]
    pub last_paas_token_probe_timestamp: Option<DateTime<Utc>>,
    /// Version label of the currently running ActiveGate image
    #[serde(default)]
    pub active_gate_image_version: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(r#type: &str, ok: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if ok { "True" } else { "False" }.to_string(),
            last_transition_time: None,
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl DynaKubeStatus {
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Insert or replace the condition of the same type
    ///
    /// `lastTransitionTime` only moves when status, reason or message change.
    pub fn set_condition(&mut self, mut condition: Condition, now: DateTime<Utc>) {
        let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) => {
                let unchanged = existing.status == condition.status
                    && existing.reason == condition.reason
                    && existing.message == condition.message;
                if !unchanged {
                    condition.last_transition_time = Some(stamp);
                    *existing = condition;
                }
            }
            None => {
                condition.last_transition_time = Some(stamp);
                self.conditions.push(condition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let mut status = DynaKubeStatus::default();

        status.set_condition(Condition::new(CONDITION_READY, true, REASON_RECONCILED, ""), t0);
        status.set_condition(Condition::new(CONDITION_READY, true, REASON_RECONCILED, ""), t1);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );

        status.set_condition(
            Condition::new(CONDITION_READY, false, REASON_RECONCILE_FAILED, "boom"),
            t1,
        );
        assert_eq!(status.conditions.len(), 1);
        let ready = status.condition(CONDITION_READY).unwrap();
        assert!(!ready.is_true());
        assert_eq!(ready.last_transition_time.as_deref(), Some("2024-01-01T00:05:00Z"));
    }

    #[test]
    fn test_status_serializes_probe_timestamps() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let status = DynaKubeStatus {
            phase: Some(DynaKubePhase::Running),
            last_api_token_probe_timestamp: Some(t0),
            ..DynaKubeStatus::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "Running");
        assert_eq!(json["lastAPITokenProbeTimestamp"], "2024-01-01T00:00:00Z");
        assert!(json["lastPaaSTokenProbeTimestamp"].is_null());
    }
}
