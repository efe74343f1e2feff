//! # DynaKube Spec
//!
//! Main CRD specification types and accessors derived from them.

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{
    CUSTOM_PROPERTIES_SUFFIX, KUBERNETES_MONITORING_COMPONENT, MONITORING_SERVICE_ACCOUNT,
    PULL_SECRET_SUFFIX,
};

/// DynaKube Custom Resource Definition
///
/// Declares the desired observability stack for one tenant.
///
/// # Example
///
/// ```yaml
/// apiVersion: dynatrace.com/v1alpha1
/// kind: DynaKube
/// metadata:
///   name: dynakube
///   namespace: dynatrace
/// spec:
///   apiUrl: https://abc123.live.dynatrace.com/api
///   tokens: dynakube
///   networkZone: zone-a
///   kubernetesMonitoring:
///     enabled: true
///     replicas: 1
///     group: cluster-a
///     kubernetesAPIEndpoint: https://10.0.0.1:443
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "DynaKube",
    group = "dynatrace.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::DynaKubeStatus",
    shortname = "dk",
    printcolumn = r#"{"name":"ApiUrl", "type":"string", "jsonPath":".spec.apiUrl"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeSpec {
    /// Tenant API base URL, e.g. `https://<env>.live.dynatrace.com/api`
    pub api_url: String,
    /// Name of the secret holding `apiToken` and `paasToken`
    /// Defaults to the name of the DynaKube
    #[serde(default)]
    pub tokens: Option<String>,
    /// User-provided pull secret; disables pull secret generation
    #[serde(default)]
    pub custom_pull_secret: Option<String>,
    /// Disable certificate validation for tenant and registry requests
    #[serde(default)]
    pub skip_cert_check: bool,
    /// Proxy used for tenant requests and by the ActiveGate
    #[serde(default)]
    pub proxy: Option<DynaKubeProxy>,
    /// Config map with a `certs` key holding additional trusted CAs (PEM)
    #[serde(default, rename = "trustedCAs")]
    pub trusted_cas: Option<String>,
    /// Network zone the ActiveGate and hosts report into
    #[serde(default)]
    pub network_zone: Option<String>,
    /// OneAgent mode selection
    #[serde(default)]
    pub one_agent: OneAgentSpec,
    /// ActiveGate for kubernetes API monitoring
    #[serde(default)]
    pub kubernetes_monitoring: KubernetesMonitoringSpec,
}

/// Either a literal value or the name of a secret holding it
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeValueSource {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_from: Option<String>,
}

impl DynaKubeValueSource {
    /// Literal value, if set and non-empty
    pub fn literal(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    /// Referenced secret name, if set and non-empty
    pub fn secret_ref(&self) -> Option<&str> {
        self.value_from.as_deref().filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.literal().is_none() && self.secret_ref().is_none()
    }
}

/// Proxy configuration; `valueFrom` names a secret with a `proxy` key
pub type DynaKubeProxy = DynaKubeValueSource;

/// Mode selectors, at most one may be set
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentSpec {
    /// Code modules injected into workload pods, binaries provided by the CSI driver
    #[serde(default)]
    pub cloud_native_full_stack: Option<HostInjectSpec>,
    /// Code modules injected into workload pods without a host agent
    #[serde(default)]
    pub application_monitoring: Option<ApplicationMonitoringSpec>,
    /// Classic host agent as a daemon set
    #[serde(default)]
    pub classic_full_stack: Option<HostInjectSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostInjectSpec {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMonitoringSpec {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub use_csi_driver: bool,
}

/// Kubernetes monitoring ActiveGate configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesMonitoringSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Full image reference; overrides the tenant registry image
    #[serde(default)]
    pub image: Option<String>,
    /// Image tag used with the tenant registry image
    #[serde(default, rename = "activeGateVersion")]
    pub activegate_version: Option<String>,
    #[serde(default)]
    pub replicas: Option<i32>,
    /// Defaults to `dynatrace-kubernetes-monitoring`
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// Disables deletion of outdated ActiveGate pods
    #[serde(default)]
    pub disable_activegate_update: bool,
    #[serde(default)]
    pub custom_properties: Option<DynaKubeValueSource>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub dns_policy: Option<String>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
    /// ActiveGate group
    #[serde(default)]
    pub group: Option<String>,
    /// Kubernetes API endpoint registered with the tenant dashboard
    #[serde(default, rename = "kubernetesAPIEndpoint")]
    pub kubernetes_api_endpoint: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Operating mode chosen from the OneAgent selectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringMode {
    CloudNative,
    ApplicationMonitoring,
    ClassicHost,
    KubernetesMonitoringOnly,
}

impl MonitoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CloudNative => "CloudNativeFullStack",
            Self::ApplicationMonitoring => "ApplicationMonitoring",
            Self::ClassicHost => "ClassicFullStack",
            Self::KubernetesMonitoringOnly => "KubernetesMonitoring",
        }
    }
}

impl std::fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DynaKube {
    /// Namespace of the DynaKube, `default` if unset
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    /// Name of the tokens secret
    pub fn tokens_secret_name(&self) -> String {
        self.spec
            .tokens
            .as_deref()
            .filter(|t| !t.is_empty())
            .map_or_else(|| self.name_any(), str::to_string)
    }

    /// User-provided pull secret, if any
    pub fn custom_pull_secret(&self) -> Option<&str> {
        self.spec
            .custom_pull_secret
            .as_deref()
            .filter(|s| !s.is_empty())
    }

    /// Name of the generated pull secret
    pub fn generated_pull_secret_name(&self) -> String {
        format!("{}{}", self.name_any(), PULL_SECRET_SUFFIX)
    }

    /// Pull secret used by pods and registry lookups
    pub fn pull_secret_name(&self) -> String {
        self.custom_pull_secret()
            .map_or_else(|| self.generated_pull_secret_name(), str::to_string)
    }

    pub fn network_zone(&self) -> Option<&str> {
        self.spec.network_zone.as_deref().filter(|z| !z.is_empty())
    }

    pub fn proxy(&self) -> Option<&DynaKubeProxy> {
        self.spec.proxy.as_ref().filter(|p| !p.is_empty())
    }

    pub fn trusted_cas(&self) -> Option<&str> {
        self.spec.trusted_cas.as_deref().filter(|c| !c.is_empty())
    }

    pub fn kubernetes_monitoring_enabled(&self) -> bool {
        self.spec.kubernetes_monitoring.enabled
    }

    /// User-provided ActiveGate image, if any
    pub fn custom_activegate_image(&self) -> Option<&str> {
        self.spec
            .kubernetes_monitoring
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
    }

    /// Service account the ActiveGate runs as
    pub fn monitoring_service_account(&self) -> String {
        self.spec
            .kubernetes_monitoring
            .service_account_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(MONITORING_SERVICE_ACCOUNT)
            .to_string()
    }

    /// Custom properties configuration, if anything is set
    pub fn custom_properties(&self) -> Option<&DynaKubeValueSource> {
        self.spec
            .kubernetes_monitoring
            .custom_properties
            .as_ref()
            .filter(|cp| !cp.is_empty())
    }

    /// Name of the secret generated from a literal custom properties value
    pub fn custom_properties_secret_name(&self) -> String {
        format!(
            "{}-{}{}",
            self.name_any(),
            KUBERNETES_MONITORING_COMPONENT,
            CUSTOM_PROPERTIES_SUFFIX
        )
    }

    pub fn kubernetes_api_endpoint(&self) -> Option<&str> {
        self.spec
            .kubernetes_monitoring
            .kubernetes_api_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
    }

    /// Select the operating mode
    ///
    /// Fails when more than one mode selector is set.
    pub fn mode(&self) -> Result<MonitoringMode, String> {
        let one_agent = &self.spec.one_agent;
        let selected: Vec<MonitoringMode> = [
            (one_agent.cloud_native_full_stack.is_some(), MonitoringMode::CloudNative),
            (
                one_agent.application_monitoring.is_some(),
                MonitoringMode::ApplicationMonitoring,
            ),
            (one_agent.classic_full_stack.is_some(), MonitoringMode::ClassicHost),
        ]
        .into_iter()
        .filter_map(|(set, mode)| set.then_some(mode))
        .collect();

        match selected.as_slice() {
            [] => Ok(MonitoringMode::KubernetesMonitoringOnly),
            [mode] => Ok(*mode),
            modes => Err(format!(
                "only one oneAgent mode may be set, found {}",
                modes
                    .iter()
                    .map(MonitoringMode::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}
