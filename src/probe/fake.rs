//! In-memory hub for prober tests
//!
//! [`FakeFleetApi`] keeps placements, works and test namespaces in a map and
//! runs a [`SimulatedFleet`] reconciler on every placement read, so status
//! evolves with the number of polls instead of wall-clock time.

use crate::crd::placement::{
    ClusterResourcePlacement, PlacementConditionType, PlacementStatus, ResourceIdentifier,
    ResourcePlacementStatus,
};
use crate::crd::types::{Condition, ConditionStatus};
use crate::crd::work::{
    member_namespace, work_name, ManifestCondition, Work, WorkSpec, WorkStatus,
};
use crate::probe::api::{ApiError, FleetApi};
use crate::probe::manifests::ManifestBundle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Residual selection once the namespaced test resources are gone: namespace + CRD
pub const RESIDUAL: usize = 2;

/// Hub state visible to the reconciler and to test assertions
#[derive(Default)]
pub struct World {
    pub placements: HashMap<String, ClusterResourcePlacement>,
    /// Keyed by (namespace, name)
    pub works: HashMap<(String, String), Work>,
    /// Test namespace -> number of test resources currently in it
    pub namespaces: HashMap<String, usize>,
    /// Placement reads per placement name
    pub placement_gets: HashMap<String, u32>,
    pub deleted_placements: Vec<String>,
    pub deleted_namespaces: Vec<String>,
}

/// Behaviour of the simulated placement controller
#[derive(Debug, Clone)]
pub struct SimulatedFleet {
    pub clusters: Vec<String>,
    /// Reads before Available turns True; `None` never
    pub available_after: Option<u32>,
    /// Reads after the resource removal was noticed before the update conditions turn True
    pub update_after: Option<u32>,
    /// Cluster whose Work never reflects the removal
    pub lagging_cluster: Option<String>,
    /// Available reported as current False until it turns True
    pub report_false_first: bool,
    removal_seen_at: HashMap<String, u32>,
}

impl SimulatedFleet {
    pub fn new(clusters: &[&str]) -> Self {
        Self {
            clusters: clusters.iter().map(|c| c.to_string()).collect(),
            available_after: Some(1),
            update_after: Some(1),
            lagging_cluster: None,
            report_false_first: false,
            removal_seen_at: HashMap::new(),
        }
    }

    pub fn available_after(mut self, reads: Option<u32>) -> Self {
        self.available_after = reads;
        self
    }

    pub fn update_after(mut self, reads: Option<u32>) -> Self {
        self.update_after = reads;
        self
    }

    pub fn lagging_cluster(mut self, cluster: &str) -> Self {
        self.lagging_cluster = Some(cluster.to_string());
        self
    }

    pub fn report_false_first(mut self) -> Self {
        self.report_false_first = true;
        self
    }

    fn reconcile(&mut self, world: &mut World, name: &str) {
        let reads = world.placement_gets.get(name).copied().unwrap_or(0);
        let Some(crp) = world.placements.get(name) else {
            return;
        };

        let namespace = crp
            .spec
            .resource_selectors
            .iter()
            .find(|s| s.kind == "Namespace")
            .map(|s| s.name.clone());
        let namespaced = namespace
            .as_ref()
            .and_then(|ns| world.namespaces.get(ns).copied())
            .unwrap_or(0);

        let mut generation = crp.metadata.generation.unwrap_or(1);
        let available = self.available_after.is_some_and(|after| reads >= after);
        if !available {
            let status = if self.report_false_first {
                Some(ConditionStatus::False)
            } else {
                None
            };
            self.write_status(world, name, generation, status, None, RESIDUAL + namespaced);
            return;
        }

        // The namespaced resources were deleted after the placement came up
        let removed = namespace.is_some() && namespaced == 0;
        if removed && !self.removal_seen_at.contains_key(name) {
            self.removal_seen_at.insert(name.to_string(), reads);
            generation += 1;
        }

        let update = match (self.removal_seen_at.get(name), self.update_after) {
            (Some(seen), Some(after)) => Some(reads >= seen + after),
            _ => None,
        };

        self.write_status(
            world,
            name,
            generation,
            Some(ConditionStatus::True),
            update,
            RESIDUAL + namespaced,
        );
        self.write_works(world, name, RESIDUAL + namespaced, removed);
    }

    fn write_status(
        &self,
        world: &mut World,
        name: &str,
        generation: i64,
        available: Option<ConditionStatus>,
        update_complete: Option<bool>,
        selected: usize,
    ) {
        let Some(crp) = world.placements.get_mut(name) else {
            return;
        };
        crp.metadata.generation = Some(generation);

        let mut conditions = Vec::new();
        if let Some(status) = available {
            conditions.push(Condition::new(
                PlacementConditionType::Available.as_str(),
                status,
                generation,
            ));
        }
        match update_complete {
            Some(true) => {
                for type_ in [
                    PlacementConditionType::Applied,
                    PlacementConditionType::WorkSynchronized,
                    PlacementConditionType::Scheduled,
                ] {
                    conditions.push(Condition::new(type_.as_str(), ConditionStatus::True, generation));
                }
            }
            Some(false) => {
                // Still true for the generation before the removal only
                for type_ in [
                    PlacementConditionType::Applied,
                    PlacementConditionType::WorkSynchronized,
                    PlacementConditionType::Scheduled,
                ] {
                    conditions.push(Condition::new(
                        type_.as_str(),
                        ConditionStatus::True,
                        generation - 1,
                    ));
                }
            }
            None => {}
        }

        crp.status = Some(PlacementStatus {
            selected_resources: (0..selected)
                .map(|i| ResourceIdentifier {
                    version: "v1".to_string(),
                    kind: "Resource".to_string(),
                    name: format!("resource-{}", i),
                    ..Default::default()
                })
                .collect(),
            placement_statuses: if available == Some(ConditionStatus::True) {
                self.clusters
                    .iter()
                    .map(|c| ResourcePlacementStatus {
                        cluster_name: c.clone(),
                        conditions: Vec::new(),
                    })
                    .collect()
            } else {
                Vec::new()
            },
            conditions,
            observed_resource_index: None,
        });
    }

    fn write_works(&self, world: &mut World, name: &str, manifests: usize, removed: bool) {
        for cluster in &self.clusters {
            let lagging = removed && self.lagging_cluster.as_deref() == Some(cluster.as_str());
            let key = (member_namespace(cluster), work_name(name));
            if lagging && world.works.contains_key(&key) {
                continue;
            }

            let mut work = Work::new(&key.1, WorkSpec::default());
            work.metadata.namespace = Some(key.0.clone());
            work.status = Some(WorkStatus {
                conditions: Vec::new(),
                manifest_conditions: (0..manifests).map(|_| ManifestCondition::default()).collect(),
            });
            world.works.insert(key, work);
        }
    }
}

/// Scripted failures
#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub create_namespace: bool,
    pub apply_test_resources: bool,
    pub create_placement: bool,
    pub delete_test_resources: bool,
    /// Number of initial placement reads that fail
    pub placement_reads: u32,
}

pub struct FakeFleetApi {
    world: Mutex<World>,
    fleet: Mutex<SimulatedFleet>,
    failures: Failures,
}

impl FakeFleetApi {
    pub fn new(fleet: SimulatedFleet) -> Self {
        Self::with_failures(fleet, Failures::default())
    }

    pub fn with_failures(fleet: SimulatedFleet, failures: Failures) -> Self {
        Self {
            world: Mutex::new(World::default()),
            fleet: Mutex::new(fleet),
            failures,
        }
    }

    #[allow(clippy::unwrap_used)]
    pub fn with_world<R>(&self, f: impl FnOnce(&World) -> R) -> R {
        f(&self.world.lock().unwrap())
    }

    fn not_found(kind: &'static str, name: &str) -> ApiError {
        ApiError::NotFound {
            kind,
            name: name.to_string(),
        }
    }
}

#[async_trait]
#[allow(clippy::unwrap_used)]
impl FleetApi for FakeFleetApi {
    async fn create_placement(
        &self,
        placement: &ClusterResourcePlacement,
    ) -> Result<(), ApiError> {
        let name = placement.metadata.name.clone().unwrap_or_default();
        if self.failures.create_placement {
            return Err(Self::not_found("ClusterResourcePlacement", &name));
        }
        let mut world = self.world.lock().unwrap();
        if world.placements.contains_key(&name) {
            return Err(ApiError::AlreadyExists {
                kind: "ClusterResourcePlacement",
                name,
            });
        }
        let mut crp = placement.clone();
        crp.metadata.generation = Some(1);
        world.placements.insert(name, crp);
        Ok(())
    }

    async fn get_placement(&self, name: &str) -> Result<ClusterResourcePlacement, ApiError> {
        let mut world = self.world.lock().unwrap();
        let reads = world.placement_gets.entry(name.to_string()).or_insert(0);
        *reads += 1;
        if *reads <= self.failures.placement_reads {
            return Err(Self::not_found("ClusterResourcePlacement", name));
        }

        self.fleet.lock().unwrap().reconcile(&mut world, name);
        world
            .placements
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("ClusterResourcePlacement", name))
    }

    async fn delete_placement(&self, name: &str) -> Result<(), ApiError> {
        let mut world = self.world.lock().unwrap();
        match world.placements.remove(name) {
            Some(_) => {
                world.deleted_placements.push(name.to_string());
                Ok(())
            }
            None => Err(Self::not_found("ClusterResourcePlacement", name)),
        }
    }

    async fn get_work(&self, name: &str, namespace: &str) -> Result<Work, ApiError> {
        let world = self.world.lock().unwrap();
        world
            .works
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found("Work", name))
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        if self.failures.create_namespace {
            return Err(Self::not_found("Namespace", namespace));
        }
        self.world
            .lock()
            .unwrap()
            .namespaces
            .insert(namespace.to_string(), 0);
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        let mut world = self.world.lock().unwrap();
        match world.namespaces.remove(namespace) {
            Some(_) => {
                world.deleted_namespaces.push(namespace.to_string());
                Ok(())
            }
            None => Err(Self::not_found("Namespace", namespace)),
        }
    }

    async fn apply_test_resources(
        &self,
        namespace: &str,
        bundle: &ManifestBundle,
    ) -> Result<(), ApiError> {
        let mut world = self.world.lock().unwrap();
        let Some(count) = world.namespaces.get_mut(namespace) else {
            return Err(Self::not_found("Namespace", namespace));
        };
        if self.failures.apply_test_resources {
            // First object made it before the failure
            *count = 1;
            return Err(Self::not_found("ConfigMap", "test-configmap"));
        }
        *count = bundle.objects().len();
        Ok(())
    }

    async fn delete_test_resources(
        &self,
        namespace: &str,
        _bundle: &ManifestBundle,
    ) -> Result<(), ApiError> {
        if self.failures.delete_test_resources {
            return Err(Self::not_found("Namespace", namespace));
        }
        let mut world = self.world.lock().unwrap();
        match world.namespaces.get_mut(namespace) {
            Some(count) => {
                *count = 0;
                Ok(())
            }
            None => Err(Self::not_found("Namespace", namespace)),
        }
    }
}
