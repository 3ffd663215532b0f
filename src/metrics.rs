// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the telemetry cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter.
//!
//! # Metric Naming Convention
//! - `telemetry_cache_` prefix for all metrics
//! - `_total` suffix for counters
//!
//! # Labels
//! - `kind`: data, control
//! - `status`: success, error, timeout, cancelled
//! - `backend`: redis, nats, memory

use metrics::{counter, gauge};

/// Record the outcome of a publish
pub fn record_publish(kind: &str, status: &str) {
    counter!(
        "telemetry_cache_publish_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a subscription name announced on the control channel
pub fn record_announcement() {
    counter!("telemetry_cache_announcements_total").increment(1);
}

/// Record an epoch reset of the topology set
pub fn record_topology_reset(cleared: usize) {
    counter!("telemetry_cache_topology_resets_total").increment(1);
    gauge!("telemetry_cache_topology_cleared").set(cleared as f64);
}

/// Record a message received on a data channel
pub fn record_received(status: &str) {
    counter!(
        "telemetry_cache_received_total",
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_decode_error() {
    counter!("telemetry_cache_decode_errors_total").increment(1);
}

/// Record a notification that could not be propagated for lack of a target
pub fn record_missing_target() {
    counter!("telemetry_cache_missing_target_total").increment(1);
}

/// Record a channel request dropped because the request queue stayed full
pub fn record_request_dropped() {
    counter!("telemetry_cache_channel_requests_dropped_total").increment(1);
}

/// Record a newly started channel consumption task
pub fn record_channel_started(active: usize) {
    counter!("telemetry_cache_channels_started_total").increment(1);
    gauge!("telemetry_cache_active_channels").set(active as f64);
}

pub fn record_connection_error(backend: &str) {
    counter!(
        "telemetry_cache_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Record a resubscription after a stream ended or failed
pub fn record_resubscribe(kind: &str) {
    counter!(
        "telemetry_cache_resubscribes_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Set sync state (0 = Idle, 1 = Running, 2 = Stopped)
pub fn set_sync_state(state: u8) {
    gauge!("telemetry_cache_sync_state").set(state as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must not panic.

    #[test]
    fn test_publish_metrics() {
        record_publish("data", "success");
        record_publish("control", "timeout");
        record_announcement();
    }

    #[test]
    fn test_consumption_metrics() {
        record_received("ok");
        record_received("empty");
        record_received("foreign");
        record_decode_error();
        record_request_dropped();
        record_channel_started(3);
        record_resubscribe("data");
    }

    #[test]
    fn test_lifecycle_metrics() {
        record_topology_reset(12);
        record_missing_target();
        record_connection_error("redis");
        set_sync_state(1);
    }
}
