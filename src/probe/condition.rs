//! Condition evaluation against the owning object's current generation
//!
//! A condition only counts once the reconciler has computed it for the
//! generation the object is currently at. Conditions carried over from a
//! previous generation are neither true nor false: callers treat them as pending.

use crate::crd::placement::{ClusterResourcePlacement, PlacementConditionType};
use crate::crd::types::{Condition, ConditionStatus};

fn is_current_with_status(
    condition: Option<&Condition>,
    generation: Option<i64>,
    status: ConditionStatus,
) -> bool {
    match (condition, generation) {
        (Some(c), Some(generation)) => {
            c.observed_generation == Some(generation) && c.status == status
        }
        _ => false,
    }
}

/// True iff the condition is present, current for `generation` and `True`
pub fn is_condition_true(condition: Option<&Condition>, generation: Option<i64>) -> bool {
    is_current_with_status(condition, generation, ConditionStatus::True)
}

/// True iff the condition is present, current for `generation` and `False`
pub fn is_condition_false(condition: Option<&Condition>, generation: Option<i64>) -> bool {
    is_current_with_status(condition, generation, ConditionStatus::False)
}

/// Result of evaluating a [`ConditionRule`] against one placement snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    /// Every required condition is current with the required status
    Satisfied,
    /// At least one required condition is missing, stale or mismatched
    Pending,
}

/// A set of placement conditions that must hold together
///
/// Fails closed: any missing, stale or mismatched entry leaves the rule pending.
#[derive(Debug, Clone)]
pub struct ConditionRule {
    requirements: Vec<(PlacementConditionType, ConditionStatus)>,
}

impl ConditionRule {
    pub fn new(requirements: Vec<(PlacementConditionType, ConditionStatus)>) -> Self {
        Self { requirements }
    }

    /// Rule requiring each of `types` to be current and `True`
    pub fn all_true(types: &[PlacementConditionType]) -> Self {
        Self::new(types.iter().map(|t| (*t, ConditionStatus::True)).collect())
    }

    /// Placement reports its resources available on every selected cluster
    pub fn available() -> Self {
        Self::all_true(&[PlacementConditionType::Available])
    }

    /// Placement picked up a change to its selection and finished rolling it out
    pub fn update_complete() -> Self {
        Self::all_true(&[
            PlacementConditionType::Applied,
            PlacementConditionType::WorkSynchronized,
            PlacementConditionType::Scheduled,
        ])
    }

    pub fn evaluate(&self, placement: &ClusterResourcePlacement) -> RuleVerdict {
        let generation = placement.metadata.generation;
        let satisfied = self.requirements.iter().all(|(type_, status)| {
            is_current_with_status(placement.get_condition(*type_), generation, *status)
        });

        if satisfied {
            RuleVerdict::Satisfied
        } else {
            RuleVerdict::Pending
        }
    }

    /// First required condition that is current and explicitly `False`
    pub fn first_false<'a>(
        &self,
        placement: &'a ClusterResourcePlacement,
    ) -> Option<&'a Condition> {
        let generation = placement.metadata.generation;
        self.requirements.iter().find_map(|(type_, _)| {
            let condition = placement.get_condition(*type_);
            if is_condition_false(condition, generation) {
                condition
            } else {
                None
            }
        })
    }
}
