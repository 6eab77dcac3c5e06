use fleet_loadtest::probe::{run_load, FleetApi, KubeFleetApi};
use fleet_loadtest::server::{create_metrics, run_health_server, ReadinessState};
use fleet_loadtest::LoadTestConfig;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancel the returned token once the load test has run for `length` or on Ctrl-C
///
/// Runs in flight observe the token and clean up before returning.
pub fn spawn_shutdown(length: Duration) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(length) => {
                info!(length_secs = length.as_secs(), "Load test length reached, stopping");
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Interrupted, stopping load test"),
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, stopping load test"),
                }
            }
        }
        token.cancel();
    });
    shutdown
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting fleet placement load test");

    let config = LoadTestConfig::from_env()?;
    info!(
        deadline_secs = config.deadline.as_secs(),
        poll_interval_secs = config.poll_interval.as_secs(),
        max_concurrent = config.max_concurrent,
        load_test_length_secs = config.load_test_length.as_secs(),
        use_test_resources = config.use_test_resources,
        clusters = ?config.cluster_names,
        "Load test configured"
    );

    let metrics = create_metrics()?;

    // Create readiness state (initially not ready)
    let readiness = ReadinessState::new();

    // Start health and metrics server in background
    let health_readiness = readiness.clone();
    let health_metrics = Arc::clone(&metrics);
    let port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });
    info!(port, "Health server task spawned");

    // Create Kubernetes client for the hub cluster
    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };

    info!("Connected to hub cluster");

    let probe_config = match config.probe_config() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Failed to load placement template or test resources");
            return Err(e.into());
        }
    };
    let api: Arc<dyn FleetApi> = Arc::new(KubeFleetApi::new(client));

    let shutdown = spawn_shutdown(config.load_test_length);

    // Mark as ready - connected and template loaded
    readiness.set_ready();

    let summary = run_load(shutdown, api, probe_config, Arc::clone(&metrics)).await;
    info!(runs = summary.runs, errors = summary.errors, "All probe runs finished");

    metrics.print_metrics(config.use_test_resources);

    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
