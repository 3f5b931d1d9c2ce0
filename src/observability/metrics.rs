//! Prometheus metrics for archive runs.
//!
//! Recording functions are always available and compile to no-ops without
//! the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the global recorder and serve `/metrics` on the configured address.
///
/// Must be called from inside a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &[1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0],
        )?
        .install()?;

    tracing::info!(listen = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
             Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the end of a run.
///
/// # Arguments
/// * `outcome` - `archived`, `nothing_to_archive`, `dry_run` or `failed`
/// * `duration_secs` - Wall time of the run
pub fn record_archive_run(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_runs_total", "outcome" => outcome.to_string()).increment(1);
        histogram!("archive_run_duration_seconds", "outcome" => outcome.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record rows written to an archive object.
pub fn record_rows_exported(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_rows_exported_total", "table" => table.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record rows removed from the source table.
///
/// Called on partial delete failures too, with the rows the committed
/// batches removed.
pub fn record_rows_deleted(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("archive_rows_deleted_total", "table" => table.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
