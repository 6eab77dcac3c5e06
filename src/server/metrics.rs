//! Prometheus metrics for probe runs
//!
//! Outcome counters and latency histograms for the two measured phases:
//! - apply: placement created until it reports Available
//! - update: test resources deleted until Applied/WorkSynchronized/Scheduled
//!
//! Series are labelled by the run's concurrency level and the fleet size the
//! placement landed on. Latencies additionally go into an unlabelled histogram
//! from which the end-of-run report estimates quantiles.

use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Latency buckets in seconds; placements take from sub-second to minutes
const LATENCY_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.0, 5.0, 10.0, 15.0, 20.0, 30.0, 45.0, 60.0, 90.0, 120.0, 180.0, 300.0, 600.0,
];

/// Quantiles reported at the end of a run
pub const REPORTED_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

pub const RESULT_SUCCEEDED: &str = "succeeded";
pub const RESULT_FAILED: &str = "failed";
pub const RESULT_TIMEOUT: &str = "timeout";

/// How one measured phase ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseOutcome {
    /// Phase reached its goal after the given latency
    Succeeded(Duration),
    /// Setup or mutation call failed outright
    Failed,
    /// Deadline elapsed first
    TimedOut,
}

impl PhaseOutcome {
    pub fn result_label(&self) -> &'static str {
        match self {
            PhaseOutcome::Succeeded(_) => RESULT_SUCCEEDED,
            PhaseOutcome::Failed => RESULT_FAILED,
            PhaseOutcome::TimedOut => RESULT_TIMEOUT,
        }
    }
}

/// Label values shared by every series a probe run touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    pub concurrency: String,
    pub fleet_size: String,
}

impl RunLabels {
    pub fn new(concurrency: usize, fleet_size: usize) -> Self {
        Self {
            concurrency: concurrency.to_string(),
            fleet_size: fleet_size.to_string(),
        }
    }
}

/// Format a latency the way the `latency` label carries it
pub fn format_latency(latency: Duration) -> String {
    format!("{:.3}", latency.as_secs_f64())
}

/// Collectors for one measured phase
#[derive(Clone)]
struct PhaseMetrics {
    total: IntCounterVec,
    latency: Histogram,
    latency_count: IntCounterVec,
}

impl PhaseMetrics {
    fn register(
        registry: &Registry,
        total: (&str, &str),
        latency: (&str, &str),
        latency_count: (&str, &str),
    ) -> Result<Self, prometheus::Error> {
        let total = IntCounterVec::new(
            Opts::new(total.0, total.1),
            &["concurrency", "numTargetCluster", "result"],
        )?;
        registry.register(Box::new(total.clone()))?;

        let latency = Histogram::with_opts(
            HistogramOpts::new(latency.0, latency.1).buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(latency.clone()))?;

        let latency_count = IntCounterVec::new(
            Opts::new(latency_count.0, latency_count.1),
            &["concurrency", "numTargetCluster", "latency"],
        )?;
        registry.register(Box::new(latency_count.clone()))?;

        Ok(Self {
            total,
            latency,
            latency_count,
        })
    }

    fn record(&self, labels: &RunLabels, outcome: PhaseOutcome) {
        if let PhaseOutcome::Succeeded(latency) = outcome {
            self.latency.observe(latency.as_secs_f64());
            self.latency_count
                .with_label_values(&[
                    labels.concurrency.as_str(),
                    labels.fleet_size.as_str(),
                    format_latency(latency).as_str(),
                ])
                .inc();
        }
        self.total
            .with_label_values(&[
                labels.concurrency.as_str(),
                labels.fleet_size.as_str(),
                outcome.result_label(),
            ])
            .inc();
    }

    fn count(&self, labels: &RunLabels, result: &str) -> u64 {
        sum_counters(
            &self.total.collect(),
            &[
                ("concurrency", labels.concurrency.as_str()),
                ("numTargetCluster", labels.fleet_size.as_str()),
                ("result", result),
            ],
        )
    }

    fn snapshot(&self) -> PhaseSnapshot {
        let families = self.total.collect();
        PhaseSnapshot {
            succeeded: sum_counters(&families, &[("result", RESULT_SUCCEEDED)]),
            failed: sum_counters(&families, &[("result", RESULT_FAILED)]),
            timed_out: sum_counters(&families, &[("result", RESULT_TIMEOUT)]),
            latency: latency_summary(&self.latency),
        }
    }
}

/// Sum the counters in `families` whose labels match every `(name, value)` pair
fn sum_counters(families: &[MetricFamily], labels: &[(&str, &str)]) -> u64 {
    families
        .iter()
        .flat_map(|family| family.get_metric())
        .filter(|metric| {
            labels.iter().all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
            })
        })
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

fn latency_summary(histogram: &Histogram) -> LatencySummary {
    let buckets: Vec<(f64, u64)> = histogram
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .flat_map(|metric| metric.get_histogram().get_bucket())
        .map(|bucket| (bucket.get_upper_bound(), bucket.get_cumulative_count()))
        .collect();
    let count = histogram.get_sample_count();

    LatencySummary {
        count,
        sum_seconds: histogram.get_sample_sum(),
        quantiles: REPORTED_QUANTILES
            .iter()
            .filter_map(|q| estimate_quantile(&buckets, count, *q).map(|v| (*q, v)))
            .collect(),
    }
}

/// Estimate quantile `q` from cumulative histogram buckets
///
/// Linear interpolation inside the bucket holding the target rank, with the
/// first bucket starting at zero. Ranks beyond the last finite bucket clamp to
/// its upper bound. `None` without observations.
pub fn estimate_quantile(buckets: &[(f64, u64)], total: u64, q: f64) -> Option<f64> {
    if total == 0 || buckets.is_empty() {
        return None;
    }

    let rank = q.clamp(0.0, 1.0) * total as f64;
    let mut lower_bound = 0.0;
    let mut lower_count = 0u64;

    for &(upper_bound, cumulative) in buckets {
        if cumulative as f64 >= rank && cumulative > lower_count {
            let in_bucket = (cumulative - lower_count) as f64;
            let fraction = (rank - lower_count as f64) / in_bucket;
            return Some(lower_bound + (upper_bound - lower_bound) * fraction);
        }
        lower_bound = upper_bound;
        lower_count = cumulative;
    }

    buckets.last().map(|(upper_bound, _)| *upper_bound)
}

/// Latency distribution of one phase
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub sum_seconds: f64,
    /// `(quantile, seconds)` pairs; empty without observations
    pub quantiles: Vec<(f64, f64)>,
}

/// Totals of one phase across all label values
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub latency: LatencySummary,
}

impl PhaseSnapshot {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.timed_out
    }
}

/// Point-in-time view of all probe metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub placements_created: u64,
    pub apply: PhaseSnapshot,
    pub update: PhaseSnapshot,
}

impl MetricsSnapshot {
    /// Human-readable report; the update phase only when it was exercised
    pub fn render(&self, include_update: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "placements created: {}", self.placements_created);
        render_phase(&mut out, "apply", &self.apply);
        if include_update {
            render_phase(&mut out, "update", &self.update);
        }
        out
    }
}

fn render_phase(out: &mut String, name: &str, phase: &PhaseSnapshot) {
    let _ = writeln!(
        out,
        "{} result: succeeded={} failed={} timeout={}",
        name, phase.succeeded, phase.failed, phase.timed_out
    );
    let _ = writeln!(
        out,
        "{} latency: count={} sum={:.3}s",
        name, phase.latency.count, phase.latency.sum_seconds
    );
    for (q, seconds) in &phase.latency.quantiles {
        let _ = writeln!(out, "{} latency p{}: {:.3}s", name, (q * 100.0).round(), seconds);
    }
}

/// Probe metrics registry
///
/// Thread-safe container for all Prometheus metrics.
/// Clone is cheap (collectors are Arc internally).
#[derive(Clone)]
pub struct ProbeMetrics {
    registry: Registry,
    /// Placements successfully created on the hub
    placements_created: IntCounter,
    apply: PhaseMetrics,
    update: PhaseMetrics,
}

impl ProbeMetrics {
    /// Create a new registry with all probe metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let placements_created = IntCounter::new(
            "placement_created_total",
            "Total number of placements created",
        )?;
        registry.register(Box::new(placements_created.clone()))?;

        let apply = PhaseMetrics::register(
            &registry,
            ("workload_apply_total", "Total number of placement applies"),
            (
                "quantile_apply_crp_latency",
                "Seconds from placement creation until it is available",
            ),
            ("apply_crp_latency_count", "Placement apply latencies"),
        )?;

        let update = PhaseMetrics::register(
            &registry,
            ("workload_update_total", "Total number of placement updates"),
            (
                "quantile_update_latency",
                "Seconds from test resource deletion until the update completed",
            ),
            ("update_crp_latency_count", "Placement update latencies"),
        )?;

        Ok(Self {
            registry,
            placements_created,
            apply,
            update,
        })
    }

    pub fn record_placement_created(&self) {
        self.placements_created.inc();
    }

    /// Record how an apply phase ended
    pub fn record_apply(&self, labels: &RunLabels, outcome: PhaseOutcome) {
        self.apply.record(labels, outcome);
    }

    /// Record how an update phase ended
    pub fn record_update(&self, labels: &RunLabels, outcome: PhaseOutcome) {
        self.update.record(labels, outcome);
    }

    /// Apply outcomes recorded for one label pair and result
    pub fn apply_count(&self, labels: &RunLabels, result: &str) -> u64 {
        self.apply.count(labels, result)
    }

    /// Update outcomes recorded for one label pair and result
    pub fn update_count(&self, labels: &RunLabels, result: &str) -> u64 {
        self.update.count(labels, result)
    }

    /// Read every counter and histogram without resetting anything
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            placements_created: self.placements_created.get(),
            apply: self.apply.snapshot(),
            update: self.update.snapshot(),
        }
    }

    /// Print the end-of-run report and log the outcome totals
    ///
    /// Update metrics are only meaningful when test resources were used.
    pub fn print_metrics(&self, include_update: bool) {
        let snapshot = self.snapshot();
        println!("{}", snapshot.render(include_update));

        info!(count = snapshot.placements_created, "Placements created");
        info!(
            succeeded = snapshot.apply.succeeded,
            failed = snapshot.apply.failed,
            timeout = snapshot.apply.timed_out,
            "Placement apply result"
        );
        if include_update {
            info!(
                succeeded = snapshot.update.succeeded,
                failed = snapshot.update.failed,
                timeout = snapshot.update.timed_out,
                "Placement update result"
            );
        }
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }
}

/// Shared metrics handle passed into every probe run
pub type SharedMetrics = Arc<ProbeMetrics>;

/// Create a new shared metrics instance
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ProbeMetrics::new()?))
}
