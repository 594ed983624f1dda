//! Observability for the session coordinator.
//!
//! # Privacy by Default
//!
//! Room credentials are `SecretString` and never appear in spans or events.
//! Metric labels are bounded static strings.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_join_attempts_total` | Counter | `outcome` | Join requests by outcome |
//! | `sc_join_duration_seconds` | Histogram | none | Mint-to-settle join latency |
//! | `sc_fenced_out_total` | Counter | `stage` | Stale operations discarded by the fence |
//! | `sc_publish_total` | Counter | `outcome` | Publish requests by outcome |
//! | `sc_cleanup_failures_total` | Counter | `step` | Swallowed teardown failures |
//! | `sc_remote_peers` | Gauge | none | Remote peers in the registry |

pub mod metrics;

pub use metrics::{
    init_metrics_recorder, record_cleanup_failure, record_fenced_out, record_join_attempt,
    record_join_duration, record_publish, set_remote_peers,
};
