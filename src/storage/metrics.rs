//! Storage operation metrics shared by every backend.

use std::time::Instant;

/// Records operation metrics for a storage operation.
///
/// Two metrics are recorded per call:
/// 1. `storage_operations_total` - counter by backend, operation and status
/// 2. `storage_operation_duration_ms` - latency histogram
///
/// # Arguments
///
/// * `backend` - Backend name (e.g., "sqlite", "postgresql")
/// * `operation` - Statement label (e.g., "url_cache.get")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success", "error" or "locked")
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
