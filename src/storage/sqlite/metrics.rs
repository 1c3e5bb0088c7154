//! Shared metrics recording for map and store operations.

use std::time::Instant;

/// Records operation metrics for storage operations.
///
/// This function records two metrics for each operation:
/// 1. `sqlmap_operations_total` - Counter for operation count by status
/// 2. `sqlmap_operation_duration_ms` - Histogram for operation latency
///
/// # Arguments
///
/// * `operation` - Operation name (e.g., "get", "set", "page")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success" or "error")
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "sqlmap_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "sqlmap_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Records metrics for `result` and hands it back.
pub fn observe<T>(
    operation: &'static str,
    start: Instant,
    result: crate::Result<T>,
) -> crate::Result<T> {
    let status = if result.is_ok() { "success" } else { "error" };
    record_operation_metrics(operation, start, status);
    result
}
