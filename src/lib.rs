pub mod config;
pub mod crd;
pub mod probe;
pub mod server;

// Re-export for main.rs
pub use crate::config::{ConfigError, LoadTestConfig};
