// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for inbox-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `inbox_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `cache`: conversations, messages, presence, feed
//! - `operation`: query, subscribe, batch_write, send
//! - `kind`: reads, writes
//! - `status`: success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a cache lookup (`hit`, `miss`, `expired`)
pub fn record_cache_lookup(cache: &str, outcome: &str) {
    counter!(
        "inbox_sync_cache_lookups_total",
        "cache" => cache.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set current entry count of a cache
pub fn set_cache_entries(cache: &str, count: usize) {
    gauge!(
        "inbox_sync_cache_entries",
        "cache" => cache.to_string()
    )
    .set(count as f64);
}

/// Record a remote store or transport call
pub fn record_remote_op(operation: &str, status: &str) {
    counter!(
        "inbox_sync_remote_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record remote call latency
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "inbox_sync_remote_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set metered usage for the current window
pub fn set_usage(kind: &str, used: u64) {
    gauge!(
        "inbox_sync_usage",
        "kind" => kind.to_string()
    )
    .set(used as f64);
}

/// Set usage level (0 = normal, 1 = warn, 2 = exceeded)
pub fn set_usage_level(kind: &str, level: u8) {
    gauge!(
        "inbox_sync_usage_level",
        "kind" => kind.to_string()
    )
    .set(level as f64);
}

/// Record an operation skipped because the metered budget is spent
pub fn record_quota_skip(operation: &str) {
    counter!(
        "inbox_sync_quota_skips_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a payload dropped because its subscription was superseded
pub fn record_discarded_snapshot(stream: &str) {
    counter!(
        "inbox_sync_discarded_snapshots_total",
        "stream" => stream.to_string()
    )
    .increment(1);
}

/// Record a subscription lifecycle event
pub fn record_subscription_event(event: &str) {
    counter!(
        "inbox_sync_subscription_events_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a logical field resolved by its default during normalization
pub fn record_schema_fallback(origin: &str, field: &str) {
    counter!(
        "inbox_sync_schema_fallbacks_total",
        "origin" => origin.to_string(),
        "field" => field.to_string()
    )
    .increment(1);
}

/// Record aggregation output
pub fn record_aggregate(messages: usize, duplicates_dropped: usize) {
    gauge!("inbox_sync_aggregate_messages").set(messages as f64);
    counter!("inbox_sync_aggregate_duplicates_total").increment(duplicates_dropped as u64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "inbox_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an outbound message attempt
pub fn record_message_sent(status: &str) {
    counter!(
        "inbox_sync_messages_sent_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set number of materialized subscriptions
pub fn set_live_subscriptions(count: usize) {
    gauge!("inbox_sync_live_subscriptions").set(count as f64);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}
