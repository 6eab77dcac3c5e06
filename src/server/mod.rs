//! HTTP server for health and metrics endpoints
//!
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (load test is running)
//! - `/metrics` - Prometheus scrape endpoint

mod health;
pub mod metrics;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, ProbeMetrics, SharedMetrics};

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_tests;
