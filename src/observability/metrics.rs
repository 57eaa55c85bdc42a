//! Prometheus metrics.
//!
//! Counters and histograms are lock-free and process-wide; the recorder is
//! installed once at boot and the `/metrics` endpoint renders from the
//! stored handle. Without the `prometheus` feature every helper is a no-op.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics setup error: {0}")]
    Setup(String),
}

/// Install the Prometheus recorder with the configured static labels.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.labels {
        builder = builder.add_global_label(key, value);
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without the prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Get the Prometheus handle for rendering the `/metrics` endpoint.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric recording functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let status_class = format!("{}xx", status / 100);
        counter!("http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string(),
            "status_class" => status_class.clone())
        .increment(1);
        histogram!("http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_class" => status_class)
        .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (method, path, status, duration_secs);
    }
}

/// Record an appended entry.
pub fn record_entry_appended(channel: &str) {
    #[cfg(feature = "prometheus")]
    counter!("entries_appended_total", "channel" => channel.to_string()).increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = channel;
}

/// Record a memory sync and its outcome.
pub fn record_memory_sync(outcome: &str) {
    #[cfg(feature = "prometheus")]
    counter!("memory_syncs_total", "outcome" => outcome.to_string()).increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = outcome;
}

/// Record an attachment upload.
pub fn record_attachment_upload(backend: &str, size_bytes: i64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("attachment_uploads_total", "backend" => backend.to_string()).increment(1);
        histogram!("attachment_upload_bytes", "backend" => backend.to_string())
            .record(size_bytes as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    let _ = (backend, size_bytes);
}

/// Record rows removed by the attachment cleanup job.
pub fn record_attachment_cleanup(removed: u64) {
    #[cfg(feature = "prometheus")]
    counter!("attachment_cleanup_removed_total").increment(removed);
    #[cfg(not(feature = "prometheus"))]
    let _ = removed;
}

/// Record an eviction pass.
pub fn record_eviction(groups: u64, entries: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("eviction_groups_total").increment(groups);
        counter!("eviction_entries_total").increment(entries);
    }
    #[cfg(not(feature = "prometheus"))]
    let _ = (groups, entries);
}

/// Record entries pushed into the vector index.
pub fn record_entries_indexed(count: u64) {
    #[cfg(feature = "prometheus")]
    counter!("entries_vector_indexed_total").increment(count);
    #[cfg(not(feature = "prometheus"))]
    let _ = count;
}

/// Record recorder session lifecycle events.
pub fn record_recorder_event(event: &str) {
    #[cfg(feature = "prometheus")]
    counter!("recorder_sessions_total", "event" => event.to_string()).increment(1);
    #[cfg(not(feature = "prometheus"))]
    let _ = event;
}
