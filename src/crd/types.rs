use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a condition (True, False, Unknown)
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style status condition stamped with the generation it was computed against
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ClusterResourcePlacementAvailable)
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Generation of the owning object this condition was last computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// RFC 3339 timestamp of the last status change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a condition observed at `generation`, stamped with the current time
    pub fn new(type_: impl Into<String>, status: ConditionStatus, generation: i64) -> Self {
        Self {
            type_: type_.into(),
            status,
            observed_generation: Some(generation),
            reason: String::new(),
            message: String::new(),
            last_transition_time: Some(Utc::now().to_rfc3339()),
        }
    }
}

/// Find a condition by type in a condition list
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Schema for fields whose content is owned by the fleet API server
pub(crate) fn any_object(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
