//! Load test configuration
//!
//! Everything is read from `FLEET_LOADTEST_*` environment variables; unset
//! variables fall back to the defaults below.

use crate::probe::manifests::{load_placement_template, ManifestBundle, ManifestError};
use crate::probe::run::ProbeConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_LOAD_TEST_LENGTH: Duration = Duration::from_secs(900);
pub const DEFAULT_PLACEMENT_FILE: &str = "test-crp.yaml";
pub const DEFAULT_METRICS_PORT: u16 = 4848;
/// The test namespace and the template's CRD stay selected after the bundle is deleted
pub const DEFAULT_EXPECTED_RESIDUAL: usize = 2;

const ENV_PREFIX: &str = "FLEET_LOADTEST_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{key} must be greater than zero")]
    Zero { key: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Load test settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestConfig {
    /// Bound on each polling phase of a run
    pub deadline: Duration,
    pub poll_interval: Duration,
    /// Number of probe runs kept in flight
    pub max_concurrent: usize,
    /// How long to keep starting new runs
    pub load_test_length: Duration,
    /// Placement template stamped out for every run
    pub placement_file: PathBuf,
    /// Test resources to use instead of the built-in bundle
    pub manifest_file: Option<PathBuf>,
    /// Propagate a test namespace and measure how its removal rolls out
    pub use_test_resources: bool,
    /// Member clusters the placement targets
    pub cluster_names: Vec<String>,
    pub metrics_port: u16,
    pub expected_residual_resources: usize,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            load_test_length: DEFAULT_LOAD_TEST_LENGTH,
            placement_file: PathBuf::from(DEFAULT_PLACEMENT_FILE),
            manifest_file: None,
            use_test_resources: false,
            cluster_names: Vec::new(),
            metrics_port: DEFAULT_METRICS_PORT,
            expected_residual_resources: DEFAULT_EXPECTED_RESIDUAL,
        }
    }
}

impl LoadTestConfig {
    /// Create config from environment variables
    ///
    /// Uses (all prefixed with `FLEET_LOADTEST_`):
    /// - `DEADLINE_SECS`, `POLL_INTERVAL_SECS`, `LOAD_TEST_LENGTH_SECS`
    /// - `MAX_CONCURRENT`
    /// - `PLACEMENT_FILE`, `MANIFEST_FILE`
    /// - `USE_TEST_RESOURCES` (`true`/`false`)
    /// - `CLUSTERS` (comma separated)
    /// - `METRICS_PORT`, `EXPECTED_RESIDUAL_RESOURCES`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LoadTestConfig::from_env`] with an injectable variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        };

        let defaults = Self::default();
        let config = Self {
            deadline: parse_secs(get("DEADLINE_SECS"))?.unwrap_or(defaults.deadline),
            poll_interval: parse_secs(get("POLL_INTERVAL_SECS"))?
                .unwrap_or(defaults.poll_interval),
            max_concurrent: parse(get("MAX_CONCURRENT"))?.unwrap_or(defaults.max_concurrent),
            load_test_length: parse_secs(get("LOAD_TEST_LENGTH_SECS"))?
                .unwrap_or(defaults.load_test_length),
            placement_file: get("PLACEMENT_FILE")
                .map(|(_, v)| PathBuf::from(v))
                .unwrap_or(defaults.placement_file),
            manifest_file: get("MANIFEST_FILE").map(|(_, v)| PathBuf::from(v)),
            use_test_resources: parse(get("USE_TEST_RESOURCES"))?
                .unwrap_or(defaults.use_test_resources),
            cluster_names: get("CLUSTERS")
                .map(|(_, v)| split_clusters(&v))
                .unwrap_or_default(),
            metrics_port: parse(get("METRICS_PORT"))?.unwrap_or(defaults.metrics_port),
            expected_residual_resources: parse(get("EXPECTED_RESIDUAL_RESOURCES"))?
                .unwrap_or(defaults.expected_residual_resources),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = |name: &str| ConfigError::Zero {
            key: format!("{}{}", ENV_PREFIX, name),
        };
        if self.max_concurrent == 0 {
            return Err(zero("MAX_CONCURRENT"));
        }
        if self.poll_interval.is_zero() {
            return Err(zero("POLL_INTERVAL_SECS"));
        }
        if self.deadline.is_zero() {
            return Err(zero("DEADLINE_SECS"));
        }
        Ok(())
    }

    /// Load the placement template and test bundle into per-run settings
    pub fn probe_config(&self) -> Result<ProbeConfig, ConfigError> {
        let placement_template = load_placement_template(&self.placement_file)?;
        let test_resources = if self.use_test_resources {
            Some(match &self.manifest_file {
                Some(path) => ManifestBundle::from_path(path)?,
                None => ManifestBundle::builtin()?,
            })
        } else {
            None
        };

        Ok(ProbeConfig {
            deadline: self.deadline,
            poll_interval: self.poll_interval,
            concurrency: self.max_concurrent,
            cluster_names: self.cluster_names.clone(),
            placement_template,
            test_resources,
            expected_residual_resources: self.expected_residual_resources,
        })
    }
}

fn parse<T>(entry: Option<(String, String)>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    entry
        .map(|(key, value)| {
            value.parse::<T>().map_err(|e| ConfigError::Invalid {
                reason: e.to_string(),
                key,
                value,
            })
        })
        .transpose()
}

fn parse_secs(entry: Option<(String, String)>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(entry)?.map(Duration::from_secs))
}

fn split_clusters(value: &str) -> Vec<String> {
    let mut clusters: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    clusters.sort();
    clusters.dedup();
    clusters
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
