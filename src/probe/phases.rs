//! Phase drivers of a probe run
//!
//! Each driver polls the hub through [`poll_until`] with its own success
//! predicate. The apply and update phases record exactly one outcome metric
//! when they complete; removal verification is best effort and records none.
//! A cancelled phase records nothing.

use crate::crd::placement::{ClusterResourcePlacement, PlacementConditionType};
use crate::crd::work::{member_namespace, work_name};
use crate::probe::api::{ApiError, FleetApi};
use crate::probe::condition::{is_condition_false, is_condition_true, ConditionRule, RuleVerdict};
use crate::probe::manifests::ManifestBundle;
use crate::probe::poller::{poll_until, Evaluation, PollOutcome, PollSettings};
use crate::server::metrics::{PhaseOutcome, ProbeMetrics, RunLabels};
use std::collections::BTreeSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How a phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseResult {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl<T> From<&PollOutcome<T>> for PhaseResult {
    fn from(outcome: &PollOutcome<T>) -> Self {
        match outcome {
            PollOutcome::Succeeded(_) => PhaseResult::Succeeded,
            PollOutcome::TimedOut => PhaseResult::TimedOut,
            PollOutcome::Cancelled => PhaseResult::Cancelled,
        }
    }
}

/// Member clusters a placement landed on
///
/// Taken once, when the placement first becomes available, and fixed for the
/// rest of the run. Includes the clusters the load test was configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSnapshot {
    clusters: BTreeSet<String>,
}

impl FleetSnapshot {
    pub fn from_placement(configured: &[String], placement: &ClusterResourcePlacement) -> Self {
        let clusters = configured
            .iter()
            .map(String::as_str)
            .chain(placement.placed_cluster_names())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Self { clusters }
    }

    pub fn size(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(String::as_str)
    }
}

/// Everything a phase needs to talk to the hub and report on one placement
pub struct PhaseContext<'a> {
    pub api: &'a dyn FleetApi,
    pub shutdown: &'a CancellationToken,
    pub metrics: &'a ProbeMetrics,
    pub settings: PollSettings,
    pub concurrency: usize,
    pub placement: &'a str,
}

impl PhaseContext<'_> {
    fn labels(&self, fleet_size: usize) -> RunLabels {
        RunLabels::new(self.concurrency, fleet_size)
    }
}

/// Result of the apply phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    pub result: PhaseResult,
    /// Empty unless the placement became available
    pub fleet: FleetSnapshot,
}

/// Create the placement and wait until it reports Available
///
/// Creation failure records a `failed` apply and is returned to the caller.
/// Otherwise the phase records `succeeded` (latency from creation) or
/// `timeout`. A current but False Available condition is logged and polled
/// again.
pub async fn create_and_wait_available(
    ctx: &PhaseContext<'_>,
    placement: &ClusterResourcePlacement,
    configured_clusters: &[String],
) -> Result<ApplyResult, ApiError> {
    info!(placement = %ctx.placement, "Creating placement");
    if let Err(e) = ctx.api.create_placement(placement).await {
        error!(placement = %ctx.placement, error = %e, "Failed to create placement");
        ctx.metrics.record_apply(&ctx.labels(0), PhaseOutcome::Failed);
        return Err(e);
    }
    ctx.metrics.record_placement_created();

    info!(placement = %ctx.placement, "Verifying that the placement becomes available");
    let start = Instant::now();
    let outcome = poll_until(
        &ctx.settings,
        ctx.shutdown,
        ctx.placement,
        || ctx.api.get_placement(ctx.placement),
        |crp: &ClusterResourcePlacement| {
            let generation = crp.metadata.generation;
            let available = crp.get_condition(PlacementConditionType::Available);
            if is_condition_true(available, generation) {
                Evaluation::Satisfied(FleetSnapshot::from_placement(configured_clusters, crp))
            } else if is_condition_false(available, generation) {
                Evaluation::Failed(format!(
                    "{} is False: {}",
                    PlacementConditionType::Available,
                    available.map(|c| c.reason.as_str()).unwrap_or_default()
                ))
            } else {
                Evaluation::Pending
            }
        },
    )
    .await;

    let result = PhaseResult::from(&outcome);
    let fleet = match outcome {
        PollOutcome::Succeeded(fleet) => {
            let latency = start.elapsed();
            info!(
                placement = %ctx.placement,
                fleet_size = fleet.size(),
                latency_ms = latency.as_millis() as u64,
                "Placement is available"
            );
            ctx.metrics
                .record_apply(&ctx.labels(fleet.size()), PhaseOutcome::Succeeded(latency));
            fleet
        }
        PollOutcome::TimedOut => {
            info!(placement = %ctx.placement, "Placement did not become available before the deadline");
            ctx.metrics
                .record_apply(&ctx.labels(0), PhaseOutcome::TimedOut);
            FleetSnapshot::default()
        }
        PollOutcome::Cancelled => FleetSnapshot::default(),
    };

    Ok(ApplyResult { result, fleet })
}

/// Delete the run's namespaced test resources, keeping the namespace
///
/// This is the change whose propagation the update phase measures. A
/// failure records a `failed` update.
pub async fn delete_test_resources(
    ctx: &PhaseContext<'_>,
    namespace: &str,
    bundle: &ManifestBundle,
    fleet: &FleetSnapshot,
) -> Result<(), ApiError> {
    info!(
        placement = %ctx.placement,
        namespace = %namespace,
        "Removing the namespaced resources selected by the placement"
    );
    if let Err(e) = ctx.api.delete_test_resources(namespace, bundle).await {
        error!(namespace = %namespace, error = %e, "Failed to delete test resources");
        ctx.metrics
            .record_update(&ctx.labels(fleet.size()), PhaseOutcome::Failed);
        return Err(e);
    }
    Ok(())
}

/// Where removal propagation stands on one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalProgress {
    /// The placement still selects a different number of resources
    PlacementLagging { selected: usize },
    /// This cluster's Work is missing or still lists a different manifest count
    ClusterLagging { cluster: String },
    /// Placement and every Work agree on the residual count
    Removed,
}

async fn removal_progress(
    api: &dyn FleetApi,
    placement: &str,
    fleet: &FleetSnapshot,
    expected: usize,
) -> Result<RemovalProgress, ApiError> {
    let crp = api.get_placement(placement).await?;
    let selected = crp.selected_resource_count();
    if selected != expected {
        return Ok(RemovalProgress::PlacementLagging { selected });
    }

    let work = work_name(placement);
    for cluster in fleet.clusters() {
        let caught_up = match api.get_work(&work, &member_namespace(cluster)).await {
            Ok(w) => w.manifest_count() == expected,
            Err(e) => {
                debug!(cluster = %cluster, error = %e, "Work not readable yet");
                false
            }
        };
        if !caught_up {
            return Ok(RemovalProgress::ClusterLagging {
                cluster: cluster.to_string(),
            });
        }
    }

    Ok(RemovalProgress::Removed)
}

/// Wait until the removal reached the placement status and every member cluster
///
/// Best effort: a timeout is logged and the run moves on.
pub async fn wait_resources_removed(
    ctx: &PhaseContext<'_>,
    fleet: &FleetSnapshot,
    expected_residual: usize,
) -> PhaseResult {
    info!(
        placement = %ctx.placement,
        expected = expected_residual,
        "Verifying that the removed resources are gone from the placement and its works"
    );
    let outcome = poll_until(
        &ctx.settings,
        ctx.shutdown,
        ctx.placement,
        || removal_progress(ctx.api, ctx.placement, fleet, expected_residual),
        |progress: &RemovalProgress| match progress {
            RemovalProgress::Removed => Evaluation::Satisfied(()),
            RemovalProgress::PlacementLagging { selected } => {
                debug!(
                    placement = %ctx.placement,
                    selected,
                    "Placement has not picked up the resource removal"
                );
                Evaluation::Pending
            }
            RemovalProgress::ClusterLagging { cluster } => {
                debug!(
                    placement = %ctx.placement,
                    cluster = %cluster,
                    "Member agent has not removed the resources yet"
                );
                Evaluation::Pending
            }
        },
    )
    .await;

    match outcome {
        PollOutcome::Succeeded(()) => {
            info!(placement = %ctx.placement, "Resource removal propagated to all clusters")
        }
        PollOutcome::TimedOut => {
            info!(placement = %ctx.placement, "Resource removal did not propagate before the deadline")
        }
        PollOutcome::Cancelled => {}
    }
    PhaseResult::from(&outcome)
}

/// Wait until Applied, WorkSynchronized and Scheduled are all current and True
///
/// Latency is measured from `mutate_start`, taken before the test resources
/// were deleted. Records `succeeded` or `timeout`.
pub async fn wait_update_complete(
    ctx: &PhaseContext<'_>,
    mutate_start: Instant,
    fleet: &FleetSnapshot,
) -> PhaseResult {
    info!(placement = %ctx.placement, "Verifying that the placement finished updating");
    let rule = ConditionRule::update_complete();
    let outcome = poll_until(
        &ctx.settings,
        ctx.shutdown,
        ctx.placement,
        || ctx.api.get_placement(ctx.placement),
        |crp: &ClusterResourcePlacement| match rule.evaluate(crp) {
            RuleVerdict::Satisfied => Evaluation::Satisfied(()),
            RuleVerdict::Pending => match rule.first_false(crp) {
                Some(condition) => Evaluation::Failed(format!(
                    "{} is False: {}",
                    condition.type_, condition.reason
                )),
                None => Evaluation::Pending,
            },
        },
    )
    .await;

    let labels = ctx.labels(fleet.size());
    match outcome {
        PollOutcome::Succeeded(()) => {
            let latency = mutate_start.elapsed();
            info!(
                placement = %ctx.placement,
                latency_ms = latency.as_millis() as u64,
                "Placement update completed"
            );
            ctx.metrics
                .record_update(&labels, PhaseOutcome::Succeeded(latency));
        }
        PollOutcome::TimedOut => {
            info!(placement = %ctx.placement, "Placement update did not complete before the deadline");
            ctx.metrics.record_update(&labels, PhaseOutcome::TimedOut);
        }
        PollOutcome::Cancelled => {}
    }
    PhaseResult::from(&outcome)
}

#[cfg(test)]
#[path = "phases_test.rs"]
mod tests;
