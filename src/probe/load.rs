//! Concurrent load driver
//!
//! Keeps `concurrency` probe runs in flight until the shutdown token fires.

use crate::probe::api::FleetApi;
use crate::probe::run::{run_probe, ProbeConfig};
use crate::server::metrics::SharedMetrics;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Totals across all workers of a load test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Runs that completed, including those that timed out or were cancelled
    pub runs: u64,
    /// Runs that ended with an error
    pub errors: u64,
}

impl LoadSummary {
    fn merge(mut self, other: LoadSummary) -> Self {
        self.runs += other.runs;
        self.errors += other.errors;
        self
    }
}

/// Run probes back to back on `config.concurrency` workers until `shutdown` fires
///
/// A run error is logged and the worker waits one poll interval before
/// starting its next run.
pub async fn run_load(
    shutdown: CancellationToken,
    api: Arc<dyn FleetApi>,
    config: Arc<ProbeConfig>,
    metrics: SharedMetrics,
) -> LoadSummary {
    info!(
        concurrency = config.concurrency,
        test_resources = config.uses_test_resources(),
        "Starting load test"
    );

    let workers: Vec<_> = (0..config.concurrency)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                shutdown.clone(),
                Arc::clone(&api),
                Arc::clone(&config),
                Arc::clone(&metrics),
            ))
        })
        .collect();

    let mut summary = LoadSummary::default();
    for joined in join_all(workers).await {
        match joined {
            Ok(worker) => summary = summary.merge(worker),
            Err(e) => error!(error = %e, "Load worker panicked"),
        }
    }

    info!(runs = summary.runs, errors = summary.errors, "Load test finished");
    summary
}

async fn run_worker(
    worker: usize,
    shutdown: CancellationToken,
    api: Arc<dyn FleetApi>,
    config: Arc<ProbeConfig>,
    metrics: SharedMetrics,
) -> LoadSummary {
    let mut summary = LoadSummary::default();

    while !shutdown.is_cancelled() {
        match run_probe(&shutdown, Arc::clone(&api), &config, &metrics).await {
            Ok(report) => {
                summary.runs += 1;
                info!(
                    worker,
                    placement = %report.placement,
                    apply = ?report.apply,
                    update = ?report.update,
                    "Probe run finished"
                );
            }
            Err(e) => {
                summary.errors += 1;
                warn!(worker, error = %e, "Probe run failed");
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }

    summary
}
