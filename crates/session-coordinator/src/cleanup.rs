//! Best-effort teardown results.
//!
//! Teardown (`leave`, `unpublish`, discarding stale capture) must always run
//! to completion. Each step's failure is logged, counted and collected in a
//! [`CleanupReport`]; it never turns the teardown itself into a failure.

use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::observability::metrics::record_cleanup_failure;
use crate::transport::MediaKind;

/// One step of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStep {
    UnpublishAudio,
    UnpublishVideo,
    CloseAudio,
    CloseVideo,
    TransportLeave,
}

impl CleanupStep {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CleanupStep::UnpublishAudio => "unpublish_audio",
            CleanupStep::UnpublishVideo => "unpublish_video",
            CleanupStep::CloseAudio => "close_audio",
            CleanupStep::CloseVideo => "close_video",
            CleanupStep::TransportLeave => "transport_leave",
        }
    }

    #[must_use]
    pub const fn unpublish(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => CleanupStep::UnpublishAudio,
            MediaKind::Video => CleanupStep::UnpublishVideo,
        }
    }

    #[must_use]
    pub const fn close(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => CleanupStep::CloseAudio,
            MediaKind::Video => CleanupStep::CloseVideo,
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A swallowed teardown failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub step: CleanupStep,
    pub error: String,
}

/// Collected failures of one teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of one step. Errors are logged and kept, never returned.
    pub fn record<E: fmt::Display>(&mut self, step: CleanupStep, result: Result<(), E>) {
        if let Err(e) = result {
            warn!(
                target: "sc.cleanup",
                step = step.as_str(),
                error = %e,
                "Teardown step failed, continuing"
            );
            record_cleanup_failure(step.as_str());
            self.failures.push(CleanupFailure {
                step,
                error: e.to_string(),
            });
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.failures.extend(other.failures);
    }

    /// Whether every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[CleanupFailure] {
        &self.failures
    }
}
