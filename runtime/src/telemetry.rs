// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
///
/// `default_filter` applies when `RUST_LOG` is unset. Logs go to stderr so
/// they never mix with summaries printed on stdout. Safe to call more than
/// once; later calls are no-ops.
pub fn init_telemetry(default_filter: &str) {
    // 1. Initialize Tracing (Logs)
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    // 2. Initialize Metrics (Prometheus)
    if PROM_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => {
            tracing::warn!("Prometheus recorder not installed: {}", e);
            return;
        }
    }

    metrics::describe_counter!("cage_executions_total", "Total number of caged executions started");
    metrics::describe_counter!("cage_aborts_total", "Executions that ended in the Aborted state, by reason");
    metrics::describe_counter!("cage_witness_entries_total", "Witness entries recorded");
    metrics::describe_histogram!("cage_execution_duration_seconds", "Wall time of caged executions");
    metrics::describe_counter!("cage_replays_total", "Replays performed, by outcome");
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
