//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Request outcomes per operation
//! - Replication queue depth and drain throughput
//! - Mirror apply latency and retries
//! - Abandoned (dead-lettered) records
//! - Engine state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `named_count_` and follow Prometheus
//! conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, batch size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use named_count::metrics;
//! use std::time::Duration;
//!
//! // In the router after an operation completes
//! metrics::record_request("increment", true);
//!
//! // In the drain task after a mirror apply
//! metrics::record_mirror_apply("value", true, Duration::from_millis(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a request outcome for one router operation.
pub fn record_request(operation: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("named_count_requests_total", "operation" => operation.to_string(), "status" => status).increment(1);
}

/// Record a record being appended to the replication queue.
pub fn record_enqueued(kind: &str) {
    counter!("named_count_replication_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Set the current replication queue depth (pending + batched).
pub fn set_queue_depth(depth: usize) {
    gauge!("named_count_replication_queue_depth").set(depth as f64);
}

/// Record a batch flush: how many records were coalesced away and how many
/// were applied.
pub fn record_batch_flush(coalesced: usize, applied: usize, errors: usize, duration: Duration) {
    counter!("named_count_batch_flushes_total").increment(1);
    counter!("named_count_batch_coalesced_total").increment(coalesced as u64);
    counter!("named_count_batch_applied_total").increment(applied as u64);
    if errors > 0 {
        counter!("named_count_batch_errors_total").increment(errors as u64);
    }
    histogram!("named_count_batch_flush_duration_seconds").record(duration.as_secs_f64());
}

/// Record a single mirror apply attempt.
pub fn record_mirror_apply(kind: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("named_count_mirror_applies_total", "kind" => kind.to_string(), "status" => status).increment(1);
    histogram!("named_count_mirror_apply_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a mirror apply retry.
pub fn record_mirror_retry(kind: &str) {
    counter!("named_count_mirror_retries_total", "kind" => kind.to_string()).increment(1);
}

/// Record a record abandoned after the retry budget was exhausted.
pub fn record_abandoned(kind: &str) {
    counter!("named_count_abandoned_records_total", "kind" => kind.to_string()).increment(1);
}

/// Record circuit breaker rejections of mirror applies.
pub fn record_circuit_rejected() {
    counter!("named_count_mirror_circuit_rejections_total").increment(1);
}

/// Set the current engine state as a labeled gauge.
pub fn set_engine_state(state: &str) {
    gauge!("named_count_engine_state", "state" => state.to_string()).set(1.0);
}

/// Set the number of live catalogue definitions.
pub fn set_catalogue_size(size: usize) {
    gauge!("named_count_catalogue_definitions").set(size as f64);
}

/// Set the number of materialized counter value rows.
pub fn set_value_rows(rows: usize) {
    gauge!("named_count_value_rows").set(rows as f64);
}
