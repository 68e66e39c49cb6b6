//! Prometheus metrics for the cache and rate-limit layer.
//!
//! Recording is cheap and safe before [`init_metrics`] runs: without an
//! installed recorder the `metrics` macros are no-ops.

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_INVALIDATED_KEYS_TOTAL: &str = "cache_invalidated_keys_total";
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    // Pull-based: /metrics renders from the handle.
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub fn record_cache_hit(scope: &str) {
    counter!(names::CACHE_HITS_TOTAL, "scope" => scope.to_string()).increment(1);
}

pub fn record_cache_miss(scope: &str) {
    counter!(names::CACHE_MISSES_TOTAL, "scope" => scope.to_string()).increment(1);
}

pub fn record_invalidated_keys(class: &str, count: u64) {
    counter!(names::CACHE_INVALIDATED_KEYS_TOTAL, "class" => class.to_string()).increment(count);
}

pub fn record_backend_error(op: &'static str) {
    counter!(names::CACHE_BACKEND_ERRORS_TOTAL, "op" => op).increment(1);
}

pub fn record_rate_limit_rejection(limiter: &str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "limiter" => limiter.to_string()).increment(1);
}
