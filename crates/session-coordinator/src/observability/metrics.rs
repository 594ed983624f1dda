//! Metrics definitions for the session coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix for the session coordinator
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: join and publish outcomes (< 10 values each)
//! - `stage`: fence check points (< 10 values)
//! - `step`: cleanup steps (bounded by `CleanupStep`)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return its handle.
///
/// Must be called before any metrics are recorded. Join latency buckets
/// cover the range of a realistic signaling round trip.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sc_join_duration".to_string()),
            &[
                0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set join duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Record the outcome of a join request.
///
/// Metric: `sc_join_attempts_total`
/// Labels: `outcome` (joined, already_joined, rejected_in_flight, superseded, failed, stopped)
pub fn record_join_attempt(outcome: &'static str) {
    counter!("sc_join_attempts_total", "outcome" => outcome).increment(1);
}

/// Record how long a join took from mint to settlement.
///
/// Metric: `sc_join_duration_seconds`
/// Labels: none
pub fn record_join_duration(duration: Duration) {
    histogram!("sc_join_duration_seconds").record(duration.as_secs_f64());
}

/// Record a fenced-out operation.
///
/// Metric: `sc_fenced_out_total`
/// Labels: `stage` (the suspension point whose freshness check failed)
///
/// Non-zero values are normal under rapid room switching.
pub fn record_fenced_out(stage: &'static str) {
    counter!("sc_fenced_out_total", "stage" => stage).increment(1);
}

// ============================================================================
// Local Capture
// ============================================================================

/// Record the outcome of a publish request.
///
/// Metric: `sc_publish_total`
/// Labels: `outcome` (audio_video, audio_only, unavailable, rejected, discarded)
pub fn record_publish(outcome: &'static str) {
    counter!("sc_publish_total", "outcome" => outcome).increment(1);
}

/// Record a swallowed teardown failure.
///
/// Metric: `sc_cleanup_failures_total`
/// Labels: `step`
pub fn record_cleanup_failure(step: &'static str) {
    counter!("sc_cleanup_failures_total", "step" => step).increment(1);
}

// ============================================================================
// Remote Peers
// ============================================================================

/// Set the number of remote peers currently in the registry.
///
/// Metric: `sc_remote_peers`
/// Labels: none
pub fn set_remote_peers(count: usize) {
    // usize to f64 conversion is safe for realistic room sizes
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_remote_peers").set(count as f64);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_functions_are_callable_without_recorder() {
        record_join_attempt("joined");
        record_join_duration(Duration::from_millis(120));
        record_fenced_out("post_join");
        record_publish("audio_only");
        record_cleanup_failure("transport_leave");
        set_remote_peers(3);
    }

    #[test]
    fn test_metrics_are_captured_by_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_join_attempt("joined");
            record_join_attempt("superseded");
            record_fenced_out("pre_join_cleanup");
            record_publish("audio_video");
            record_cleanup_failure("unpublish_audio");
            set_remote_peers(2);
            record_join_duration(Duration::from_millis(80));
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "sc_join_attempts_total",
            "sc_fenced_out_total",
            "sc_publish_total",
            "sc_cleanup_failures_total",
            "sc_remote_peers",
            "sc_join_duration_seconds",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }
}
