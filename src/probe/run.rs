//! One probe run: apply, mutate, verify, clean up
//!
//! A run creates a uniquely named placement (and, with test resources, a
//! uniquely named namespace holding the test bundle), drives it through the
//! phases in order and always deletes what it created, whatever the outcome.

use crate::crd::placement::ClusterResourcePlacement;
use crate::probe::api::{ApiError, FleetApi};
use crate::probe::manifests::{build_placement, ManifestBundle};
use crate::probe::phases::{
    create_and_wait_available, delete_test_resources, wait_resources_removed,
    wait_update_complete, FleetSnapshot, PhaseContext, PhaseResult,
};
use crate::probe::poller::PollSettings;
use crate::server::metrics::ProbeMetrics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const PLACEMENT_PREFIX: &str = "load-test-placement-";
pub const NAMESPACE_PREFIX: &str = "load-test-ns-";

const NAME_SUFFIX_LEN: usize = 10;

/// `prefix` followed by ten random lowercase hex characters
pub fn random_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..NAME_SUFFIX_LEN])
}

/// Errors that abort a run before its phases complete
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to set up test resources in {namespace}: {source}")]
    TestResources {
        namespace: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to create placement {placement}: {source}")]
    CreatePlacement {
        placement: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to delete test resources in {namespace}: {source}")]
    DeleteTestResources {
        namespace: String,
        #[source]
        source: ApiError,
    },
}

/// Settings shared by every run of a load test
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Bound on each polling phase
    pub deadline: Duration,
    pub poll_interval: Duration,
    /// Number of concurrent runs, reported as the `concurrency` label
    pub concurrency: usize,
    /// Member clusters the load test targets
    pub cluster_names: Vec<String>,
    pub placement_template: ClusterResourcePlacement,
    /// Namespaced resources to propagate and then delete; `None` skips the update phases
    pub test_resources: Option<ManifestBundle>,
    /// Resources still selected once the test bundle is gone
    pub expected_residual_resources: usize,
}

impl ProbeConfig {
    pub fn uses_test_resources(&self) -> bool {
        self.test_resources.is_some()
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings::new(self.poll_interval, self.deadline)
    }
}

/// What happened during one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub placement: String,
    pub namespace: Option<String>,
    pub fleet: FleetSnapshot,
    pub apply: PhaseResult,
    /// `None` when the phase did not run
    pub removal: Option<PhaseResult>,
    pub update: Option<PhaseResult>,
}

/// Deletes what a run created
///
/// Names are registered before the corresponding object is created. The
/// normal path awaits [`CleanupGuard::release`]; dropping an unreleased guard
/// (the run future was dropped) spawns the same cleanup onto the current
/// runtime.
struct CleanupGuard {
    api: Arc<dyn FleetApi>,
    placement: Option<String>,
    namespace: Option<String>,
}

impl CleanupGuard {
    fn new(api: Arc<dyn FleetApi>) -> Self {
        Self {
            api,
            placement: None,
            namespace: None,
        }
    }

    async fn release(mut self) {
        let placement = self.placement.take();
        let namespace = self.namespace.take();
        cleanup(Arc::clone(&self.api), placement, namespace).await;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let placement = self.placement.take();
        let namespace = self.namespace.take();
        if placement.is_none() && namespace.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    placement = ?placement,
                    namespace = ?namespace,
                    "Probe run dropped before cleanup, cleaning up in the background"
                );
                handle.spawn(cleanup(Arc::clone(&self.api), placement, namespace));
            }
            Err(_) => {
                error!(
                    placement = ?placement,
                    namespace = ?namespace,
                    "No runtime to clean up dropped probe run, objects are left behind"
                );
            }
        }
    }
}

/// Delete the placement first so the fleet stops propagating the namespace
async fn cleanup(api: Arc<dyn FleetApi>, placement: Option<String>, namespace: Option<String>) {
    if let Some(name) = placement {
        match api.delete_placement(&name).await {
            Ok(()) => info!(placement = %name, "Deleted placement"),
            Err(e) if e.is_not_found() => debug!(placement = %name, "Placement already gone"),
            Err(e) => error!(placement = %name, error = %e, "Failed to delete placement"),
        }
    }
    if let Some(ns) = namespace {
        match api.delete_namespace(&ns).await {
            Ok(()) => info!(namespace = %ns, "Deleted test namespace"),
            Err(e) if e.is_not_found() => debug!(namespace = %ns, "Test namespace already gone"),
            Err(e) => error!(namespace = %ns, error = %e, "Failed to delete test namespace"),
        }
    }
}

/// Run one placement through its lifecycle and record the outcome
///
/// Timeouts and cancellation end up in `metrics` and the returned report;
/// only setup failures and a failed test resource deletion are errors. The
/// placement and the test namespace are deleted on every exit path.
pub async fn run_probe(
    shutdown: &CancellationToken,
    api: Arc<dyn FleetApi>,
    config: &ProbeConfig,
    metrics: &ProbeMetrics,
) -> Result<ProbeReport, ProbeError> {
    let mut guard = CleanupGuard::new(Arc::clone(&api));
    let result = drive(shutdown, api.as_ref(), config, metrics, &mut guard).await;
    guard.release().await;
    result
}

async fn drive(
    shutdown: &CancellationToken,
    api: &dyn FleetApi,
    config: &ProbeConfig,
    metrics: &ProbeMetrics,
    guard: &mut CleanupGuard,
) -> Result<ProbeReport, ProbeError> {
    let placement_name = random_name(PLACEMENT_PREFIX);

    let test_resources = match &config.test_resources {
        Some(bundle) => {
            let namespace = random_name(NAMESPACE_PREFIX);
            info!(namespace = %namespace, objects = bundle.objects().len(), "Creating test resources");
            guard.namespace = Some(namespace.clone());
            let setup = async {
                api.create_namespace(&namespace).await?;
                api.apply_test_resources(&namespace, bundle).await
            };
            if let Err(source) = setup.await {
                error!(namespace = %namespace, error = %source, "Failed to create test resources");
                return Err(ProbeError::TestResources { namespace, source });
            }
            Some((namespace, bundle))
        }
        None => None,
    };

    let ctx = PhaseContext {
        api,
        shutdown,
        metrics,
        settings: config.poll_settings(),
        concurrency: config.concurrency,
        placement: &placement_name,
    };

    let placement = build_placement(
        &config.placement_template,
        &placement_name,
        test_resources.as_ref().map(|(ns, _)| ns.as_str()),
    );
    guard.placement = Some(placement_name.clone());
    let applied = create_and_wait_available(&ctx, &placement, &config.cluster_names)
        .await
        .map_err(|source| ProbeError::CreatePlacement {
            placement: placement_name.clone(),
            source,
        })?;

    let mut report = ProbeReport {
        placement: placement_name.clone(),
        namespace: test_resources.as_ref().map(|(ns, _)| ns.clone()),
        fleet: applied.fleet.clone(),
        apply: applied.result,
        removal: None,
        update: None,
    };

    let Some((namespace, bundle)) = test_resources else {
        return Ok(report);
    };
    if applied.result != PhaseResult::Succeeded {
        return Ok(report);
    }
    if applied.fleet.is_empty() {
        // No member cluster to observe the change on
        warn!(
            placement = %placement_name,
            "Placement is available on no member cluster, skipping the update phase"
        );
        return Ok(report);
    }

    let mutate_start = Instant::now();
    delete_test_resources(&ctx, &namespace, bundle, &applied.fleet)
        .await
        .map_err(|source| ProbeError::DeleteTestResources {
            namespace: namespace.clone(),
            source,
        })?;

    let removal =
        wait_resources_removed(&ctx, &applied.fleet, config.expected_residual_resources).await;
    report.removal = Some(removal);
    if removal == PhaseResult::Cancelled {
        return Ok(report);
    }

    report.update = Some(wait_update_complete(&ctx, mutate_start, &applied.fleet).await);
    Ok(report)
}

#[cfg(test)]
#[path = "run_test.rs"]
mod tests;
