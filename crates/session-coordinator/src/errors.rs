//! Session coordinator error types.
//!
//! Transport and capture failures are recovered inside the coordinator and
//! reflected in state; none of them reach the caller as an error. The only
//! error a `SessionCoordinatorHandle` method returns is [`SessionError`],
//! which means the coordinator actor is gone.

use crate::fence::Superseded;
use thiserror::Error;

/// Failure reported by the media transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The operation was aborted by a concurrent operation (e.g. leave during join).
    #[error("Transport operation aborted: {0}")]
    Aborted(String),

    /// Network or signaling failure.
    #[error("Transport network error: {0}")]
    Network(String),

    /// The transport refused the request (bad credential, banned, full room).
    #[error("Transport rejected request: {0}")]
    Rejected(String),

    /// The operation is not valid in the transport's current state.
    #[error("Transport in invalid state: {0}")]
    InvalidState(String),
}

impl TransportError {
    /// Bounded label for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            TransportError::Aborted(_) => "aborted",
            TransportError::Network(_) => "network",
            TransportError::Rejected(_) => "rejected",
            TransportError::InvalidState(_) => "invalid_state",
        }
    }
}

/// Failure acquiring, publishing or releasing a local capture track.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// No device of the requested kind exists.
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),

    /// The user or platform denied device access.
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    /// Tracks were captured but the transport refused to publish them.
    #[error("Publishing captured tracks failed: {0}")]
    Publish(#[from] TransportError),

    /// Operation on an already-acquired track failed (e.g. close).
    #[error("Track operation failed: {0}")]
    Track(String),
}

/// Why a publish attempt produced no local capture.
#[derive(Debug, Error)]
pub enum CaptureFailure {
    /// The session was superseded while capture was in progress.
    /// Any acquired tracks have already been released.
    #[error(transparent)]
    Superseded(#[from] Superseded),

    /// Neither camera+microphone nor microphone-only capture succeeded.
    #[error("No capture available (camera+mic: {combined}; mic-only: {audio_only})")]
    Unavailable {
        combined: CaptureError,
        audio_only: CaptureError,
    },
}

impl CaptureFailure {
    /// User-facing text for a total capture failure.
    ///
    /// Internal device details are logged, not shown.
    #[must_use]
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            CaptureFailure::Superseded(_) => None,
            CaptureFailure::Unavailable { .. } => Some(
                "Could not find a camera or microphone. Please check your device permissions.",
            ),
        }
    }
}

/// Error returned by the coordinator handle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The coordinator actor has stopped (mailbox closed or reply dropped).
    #[error("Session coordinator stopped: {0}")]
    CoordinatorStopped(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fence::SessionFence;

    #[test]
    fn test_transport_error_labels_are_bounded() {
        assert_eq!(TransportError::Aborted("x".into()).label(), "aborted");
        assert_eq!(TransportError::Network("x".into()).label(), "network");
        assert_eq!(TransportError::Rejected("x".into()).label(), "rejected");
        assert_eq!(
            TransportError::InvalidState("x".into()).label(),
            "invalid_state"
        );
    }

    #[test]
    fn test_capture_error_from_transport() {
        let err: CaptureError = TransportError::Network("socket closed".into()).into();
        assert!(matches!(err, CaptureError::Publish(_)));
        assert_eq!(
            err.to_string(),
            "Publishing captured tracks failed: Transport network error: socket closed"
        );
    }

    #[test]
    fn test_user_message_hides_device_details() {
        let failure = CaptureFailure::Unavailable {
            combined: CaptureError::DeviceNotFound("/dev/video0".into()),
            audio_only: CaptureError::PermissionDenied("mic blocked by policy".into()),
        };
        let message = failure.user_message().unwrap();
        assert!(!message.contains("/dev/video0"));
        assert!(!message.contains("policy"));
    }

    #[test]
    fn test_superseded_failure_has_no_user_message() {
        let fence = SessionFence::new();
        let old = fence.mint();
        let _new = fence.mint();
        let superseded = old.ensure_current("capture").unwrap_err();

        let failure = CaptureFailure::from(superseded);
        assert!(failure.user_message().is_none());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                SessionError::CoordinatorStopped("channel closed".to_string())
            ),
            "Session coordinator stopped: channel closed"
        );
    }
}
