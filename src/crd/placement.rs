use crate::crd::types::{any_object, find_condition, Condition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ClusterResourcePlacement selects hub resources and distributes them to member clusters
///
/// Only the fields the prober reads or writes are modelled; scheduling policy and
/// rollout strategy are passed through from the template untouched.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "placement.kubernetes-fleet.io",
    version = "v1beta1",
    kind = "ClusterResourcePlacement",
    shortname = "crp",
    status = "PlacementStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    /// Hub resources to propagate
    #[serde(default)]
    pub resource_selectors: Vec<ClusterResourceSelector>,

    /// Scheduling policy (PickAll, PickN, PickFixed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "any_object")]
    pub policy: Option<serde_json::Value>,

    /// Rollout strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "any_object")]
    pub strategy: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,
}

/// Selects cluster-scoped hub resources by name or label
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceSelector {
    #[serde(default)]
    pub group: String,

    pub version: String,

    pub kind: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "any_object")]
    pub label_selector: Option<LabelSelector>,
}

impl ClusterResourceSelector {
    /// Selector for a single namespace (and everything in it) by name
    pub fn namespace(name: impl Into<String>) -> Self {
        Self {
            group: String::new(),
            version: "v1".to_string(),
            kind: "Namespace".to_string(),
            name: name.into(),
            label_selector: None,
        }
    }
}

/// Status of the ClusterResourcePlacement
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementStatus {
    /// Resources selected by the placement in the latest resource snapshot
    #[serde(default)]
    pub selected_resources: Vec<ResourceIdentifier>,

    /// Per-cluster placement status, one entry per targeted member cluster
    #[serde(default)]
    pub placement_statuses: Vec<ResourcePlacementStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_resource_index: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    #[serde(default)]
    pub group: String,

    pub version: String,

    pub kind: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePlacementStatus {
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Placement-level condition types reported by the fleet hub agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementConditionType {
    Scheduled,
    Overridden,
    WorkSynchronized,
    Applied,
    Available,
}

impl PlacementConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "ClusterResourcePlacementScheduled",
            Self::Overridden => "ClusterResourcePlacementOverridden",
            Self::WorkSynchronized => "ClusterResourcePlacementWorkSynchronized",
            Self::Applied => "ClusterResourcePlacementApplied",
            Self::Available => "ClusterResourcePlacementAvailable",
        }
    }
}

impl std::fmt::Display for PlacementConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClusterResourcePlacement {
    /// Look up a placement-level condition by type
    pub fn get_condition(&self, type_: PlacementConditionType) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, type_.as_str()))
    }

    /// Number of resources the placement currently selects
    pub fn selected_resource_count(&self) -> usize {
        self.status
            .as_ref()
            .map(|s| s.selected_resources.len())
            .unwrap_or(0)
    }

    /// Names of the member clusters the placement reports status for
    pub fn placed_cluster_names(&self) -> impl Iterator<Item = &str> {
        self.status
            .iter()
            .flat_map(|s| s.placement_statuses.iter())
            .map(|p| p.cluster_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
#[path = "placement_test.rs"]
mod tests;
