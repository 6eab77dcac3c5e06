use crate::crd::types::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Work namespaces on the hub are named after the member cluster they target
pub const MEMBER_NAMESPACE_PREFIX: &str = "fleet-member-";

/// Work is the per-cluster record of manifests a placement wants applied
///
/// The hub agent writes one Work per (placement, member cluster) into the
/// cluster's reserved namespace; the member agent reports back per manifest.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "placement.kubernetes-fleet.io",
    version = "v1beta1",
    kind = "Work",
    namespaced,
    status = "WorkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkSpec {
    #[serde(default)]
    pub workload: WorkloadTemplate,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct WorkloadTemplate {
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// One entry per manifest the member agent has processed
    #[serde(default)]
    pub manifest_conditions: Vec<ManifestCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCondition {
    #[serde(default)]
    pub identifier: WorkResourceIdentifier,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkResourceIdentifier {
    #[serde(default)]
    pub ordinal: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl Work {
    /// Number of manifests the member agent reports on
    pub fn manifest_count(&self) -> usize {
        self.status
            .as_ref()
            .map(|s| s.manifest_conditions.len())
            .unwrap_or(0)
    }
}

/// Name of the Work the hub agent derives from a placement
pub fn work_name(placement_name: &str) -> String {
    format!("{}-work", placement_name)
}

/// Hub namespace reserved for a member cluster
pub fn member_namespace(cluster_name: &str) -> String {
    format!("{}{}", MEMBER_NAMESPACE_PREFIX, cluster_name)
}
