// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for progress-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing a recorder/exporter;
//! without one every call here is a no-op.
//!
//! # Metric Naming Convention
//! - `progress_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `type`: attempts, mastery, schedules, settings
//! - `label`: storage operation label (e.g. `queue.write`)
//! - `kind`: flush, account
//! - `result` / `outcome`: success, skip reason, or per-record status

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record operations discarded by queue bounding
pub fn record_queue_eviction(discarded: usize) {
    counter!("progress_sync_queue_evictions_total").increment(discarded as u64);
}

/// Record an enqueue that replaced an existing entry
pub fn record_consolidation(record_type: &str) {
    counter!(
        "progress_sync_queue_consolidations_total",
        "type" => record_type.to_string()
    )
    .increment(1);
}

/// Set current queue depth
pub fn set_queue_depth(depth: usize) {
    gauge!("progress_sync_queue_depth").set(depth as f64);
}

/// Record per-record upload outcomes
pub fn record_flush_records(record_type: &str, outcome: &str, count: usize) {
    counter!(
        "progress_sync_flush_records_total",
        "type" => record_type.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(count as u64);
}

/// Record a finished sync cycle
pub fn record_sync_cycle(kind: &str, result: &str) {
    counter!(
        "progress_sync_sync_cycles_total",
        "kind" => kind.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record a storage operation that hit its timeout
pub fn record_timeout(label: &str) {
    counter!(
        "progress_sync_storage_timeouts_total",
        "label" => label.to_string()
    )
    .increment(1);
}

/// Record storage operation latency
pub fn record_latency(label: &str, duration: Duration) {
    histogram!(
        "progress_sync_storage_operation_seconds",
        "label" => label.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record records inserted by an account merge
pub fn record_merge_inserted(record_type: &str, count: usize) {
    counter!(
        "progress_sync_merge_inserted_total",
        "type" => record_type.to_string()
    )
    .increment(count as u64);
}

/// Record an aborted account merge
pub fn record_merge_aborted(reason: &str) {
    counter!(
        "progress_sync_merge_aborted_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record circuit breaker call
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "progress_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    label: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.label, self.start.elapsed());
    }
}
