//! Fleet placement API types observed by the prober

pub mod placement;
pub mod types;
pub mod work;

pub use placement::{
    ClusterResourcePlacement, ClusterResourceSelector, PlacementConditionType, PlacementSpec,
    PlacementStatus,
};
pub use types::{Condition, ConditionStatus};
pub use work::{Work, WorkStatus};
