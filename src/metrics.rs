//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; nothing is exported unless the
//! embedding process installs a recorder.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `changestream_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use changestream_mirror::metrics;
//! use std::time::Duration;
//!
//! // After a batch comes back from the change stream
//! metrics::record_batch_read(42, Duration::from_millis(15));
//!
//! // After a change commits on the target
//! metrics::record_event_applied("upsert", Duration::from_millis(3));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Change stream
// =============================================================================

/// Record a batch read from the change stream.
pub fn record_batch_read(events: usize, duration: Duration) {
    counter!("changestream_batches_total").increment(1);
    counter!("changestream_events_read_total").increment(events as u64);
    histogram!("changestream_batch_size").record(events as f64);
    histogram!("changestream_batch_read_duration_seconds").record(duration.as_secs_f64());
}

/// Record an empty batch (no changes during the await window).
pub fn record_heartbeat() {
    counter!("changestream_heartbeats_total").increment(1);
}

/// Record changes dropped because their database isn't configured.
pub fn record_events_filtered(count: usize) {
    if count > 0 {
        counter!("changestream_events_filtered_total").increment(count as u64);
    }
}

/// Record changes that passed the filter and were handed to the applier.
pub fn record_events_processed(count: usize) {
    counter!("changestream_events_processed_total").increment(count as u64);
}

/// Seconds between the first event of the last batch and now.
pub fn set_replication_lag(lag_seconds: u64) {
    gauge!("changestream_replication_lag_seconds").set(lag_seconds as f64);
}

// =============================================================================
// Apply
// =============================================================================

/// Record a committed write by kind (`insert`, `delete`, `upsert`).
pub fn record_event_applied(kind: &str, duration: Duration) {
    counter!("changestream_events_applied_total", "op" => kind.to_string()).increment(1);
    histogram!("changestream_apply_duration_seconds", "op" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record an insert that hit an existing `_id`.
pub fn record_duplicate() {
    counter!("changestream_duplicates_total").increment(1);
}

/// Record a change that could not be applied, by error kind.
pub fn record_apply_failure(kind: &str) {
    counter!("changestream_apply_failures_total", "kind" => kind.to_string()).increment(1);
}

/// Record a retried apply attempt.
pub fn record_apply_retry(kind: &str) {
    counter!("changestream_apply_retries_total", "kind" => kind.to_string()).increment(1);
}

/// Record a change with an operation type we don't replicate.
pub fn record_unknown_op(op: &str) {
    counter!("changestream_unknown_ops_total", "op" => op.to_string()).increment(1);
}

// =============================================================================
// Loop state
// =============================================================================

/// Gauge for the replication loop state.
pub fn set_loop_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Idle" => 0.0,
        "WaitingForBatch" => 1.0,
        "Filtering" => 2.0,
        "Applying" => 3.0,
        "Stopped" => 4.0,
        "Fatal" => 5.0,
        _ => -1.0,
    };
    gauge!("changestream_loop_state").set(value);
}
