//! Placement lifecycle prober
//!
//! A probe run creates a ClusterResourcePlacement, waits for it to become
//! available, optionally mutates the resources it selects and waits for the
//! change to propagate, then deletes everything it created. [`run_load`]
//! keeps a fixed number of runs in flight for the length of a load test.

pub mod api;
pub mod condition;
pub mod load;
pub mod manifests;
pub mod phases;
pub mod poller;
pub mod run;

#[cfg(test)]
pub(crate) mod fake;

pub use api::{ApiError, FleetApi, KubeFleetApi};
pub use load::{run_load, LoadSummary};
pub use manifests::{ManifestBundle, ManifestError};
pub use run::{run_probe, ProbeConfig, ProbeError, ProbeReport};
