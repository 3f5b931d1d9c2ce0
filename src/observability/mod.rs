//! Logging and metrics.
//!
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters and histograms for archive runs

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
