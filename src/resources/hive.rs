//! The subset of the Hive API (hive.openshift.io/v1) that this operator reads and writes.
//! Only the fields we consume are modelled; everything else is ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A cluster provisioned and managed by Hive
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    /// The friendly name of the cluster
    #[serde(default)]
    pub cluster_name: String,
    /// The base DNS domain of the cluster
    #[serde(default)]
    pub base_domain: String,
    /// Whether the cluster has finished installing
    #[serde(default)]
    pub installed: bool,
}

/// Resources and secrets that Hive applies to the referenced clusters
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "hive.openshift.io", version = "v1", kind = "SyncSet", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct SyncSetSpec {
    pub cluster_deployment_refs: Vec<LocalObjectReference>,
    /// `Sync` removes objects from the target cluster once they leave the SyncSet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_apply_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_mappings: Vec<SecretMapping>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretMapping {
    pub source_ref: SecretObjectReference,
    pub target_ref: SecretObjectReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct SecretObjectReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
