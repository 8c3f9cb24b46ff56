use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{PAGERDUTY_API_SECRET_KEY, PAGERDUTY_API_SECRET_NAME};

pub static PAGERDUTY_INTEGRATION_FINALIZER: &str = "pd.managed.openshift.io/pagerduty";

pub const DEFAULT_TARGET_SECRET_NAME: &str = "pd-secret";
pub const DEFAULT_TARGET_SECRET_NAMESPACE: &str = "openshift-monitoring";

/// Requests a PagerDuty service for a Hive managed cluster, with its integration key
/// delivered to the cluster through a SyncSet
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "PagerDutyIntegration",
    group = "pagerduty.openshift.io",
    version = "v1alpha1",
    namespaced,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Service", "type":"string", "jsonPath":".status.serviceId"}"#,
    printcolumn = r#"{"name":"Status", "priority": 1, "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[kube(status = "PagerDutyIntegrationStatus", shortname = "pdi")]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyIntegrationSpec {
    /// The ClusterDeployment that should be wired up to PagerDuty
    pub cluster_deployment_ref: ClusterDeploymentReference,
    /// ID of the PagerDuty escalation policy to attach to the service
    pub escalation_policy: String,
    /// Seconds after which an unacknowledged incident resolves itself; 0 disables auto resolution
    #[serde(default)]
    pub resolve_timeout: u32,
    /// Seconds after which an acknowledged incident re-triggers; 0 disables it
    #[serde(default)]
    pub acknowledge_timeout: u32,
    /// Prefix for the PagerDuty service name and for the objects created next to the ClusterDeployment
    pub service_prefix: String,
    /// Where to read the PagerDuty API key from. Defaults to the operator's own API key secret.
    pub pagerduty_api_key_secret_ref: Option<SecretReference>,
    /// The Secret created on the managed cluster. Defaults to `pd-secret` in `openshift-monitoring`.
    pub target_secret_ref: Option<SecretReference>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct ClusterDeploymentReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Namespace and base name shared by the objects created next to a ClusterDeployment
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct DependentsReference {
    pub namespace: String,
    pub name: String,
}

impl DependentsReference {
    pub fn object_name(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.name)
    }
}

/// Status of the PagerDutyIntegration.
/// This is set and managed automatically.
/// Read-only.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyIntegrationStatus {
    pub observed_generation: Option<i64>,
    /// Cluster identifier the PagerDuty service is keyed on
    pub cluster_id: Option<String>,
    /// ID of the provisioned PagerDuty service
    pub service_id: Option<String>,
    /// ID of the Events API v2 integration on that service
    pub integration_id: Option<String>,
    /// Hash of the service settings that were last applied
    pub spec_hash: Option<String>,
    /// Where the ConfigMap, Secret and SyncSet were last applied
    pub dependents: Option<DependentsReference>,
    pub conditions: Option<Vec<PagerDutyIntegrationCondition>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PagerDutyIntegrationCondition {
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: Option<Time>,

    /// Human-readable message indicating details about last transition.
    pub message: Option<String>,

    /// Unique, one-word, CamelCase reason for the condition's last transition.
    pub reason: Option<String>,

    /// Status is the status of the condition. Can be True, False, Unknown.
    pub status: String,

    /// Type of the condition, known values are (`Ready`).
    pub r#type: String,
}

impl PagerDutyIntegration {
    pub fn api_key_secret_ref(&self, operator_namespace: &str) -> (SecretReference, &'static str) {
        let secret = self
            .spec
            .pagerduty_api_key_secret_ref
            .clone()
            .unwrap_or_else(|| SecretReference {
                name: PAGERDUTY_API_SECRET_NAME.into(),
                namespace: operator_namespace.into(),
            });
        (secret, PAGERDUTY_API_SECRET_KEY)
    }

    pub fn target_secret_ref(&self) -> SecretReference {
        self.spec
            .target_secret_ref
            .clone()
            .unwrap_or_else(|| SecretReference {
                name: DEFAULT_TARGET_SECRET_NAME.into(),
                namespace: DEFAULT_TARGET_SECRET_NAMESPACE.into(),
            })
    }

    /// Location of the objects created next to the ClusterDeployment. Derived from the spec
    /// alone so that cleanup works even once the ClusterDeployment is gone.
    pub fn dependents(&self) -> DependentsReference {
        DependentsReference {
            namespace: self.spec.cluster_deployment_ref.namespace.clone(),
            name: format!(
                "{}-{}",
                self.spec.service_prefix, self.spec.cluster_deployment_ref.name
            ),
        }
    }

    pub fn dependent_name(&self, suffix: &str) -> String {
        self.dependents().object_name(suffix)
    }

    /// Dependents applied for an earlier spec that no longer match the current one
    pub fn stale_dependents(&self) -> Option<DependentsReference> {
        let applied = self.status.as_ref()?.dependents.clone()?;
        (applied != self.dependents()).then_some(applied)
    }

    pub fn ready_condition(&self) -> Option<&PagerDutyIntegrationCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|c| c.iter().find(|cond| cond.r#type == "Ready"))
    }
}
