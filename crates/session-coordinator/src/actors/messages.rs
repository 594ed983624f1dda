//! Message and state types for the session coordinator actor.
//!
//! Each operation uses a request-response pattern via `oneshot` channels.
//! Long-running work (transport join, capture) runs in spawned tasks that
//! report back with a `*Settled` message carrying their [`SessionToken`];
//! the actor re-checks the token before applying any result.

use common::types::RoomId;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::oneshot;

use crate::capture::{CaptureKind, LocalCapture};
use crate::cleanup::CleanupReport;
use crate::errors::{CaptureFailure, TransportError};
use crate::fence::{SessionId, SessionToken, Superseded};
use crate::membership::RoomMembership;
use crate::peers::RemotePeer;
use crate::transport::ConnectionState;

/// Callback invoked exactly once when a publish finds no usable device.
pub type FailureCallback = Box<dyn FnOnce() + Send + 'static>;

/// How a join treats a join that is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Refuse and return `None` (plain `join`).
    RejectInFlight,
    /// Mint a new session anyway, making the in-flight join stale (`switch_room`).
    Supersede,
}

/// Messages handled by the coordinator actor.
pub(crate) enum CoordinatorMessage {
    Join {
        membership: RoomMembership,
        mode: JoinMode,
        respond_to: oneshot::Sender<Option<SessionId>>,
    },

    /// A spawned join task finished driving the transport.
    JoinSettled {
        token: SessionToken,
        room: RoomId,
        attempt: JoinAttempt,
        started: Instant,
        respond_to: oneshot::Sender<Option<SessionId>>,
    },

    Leave {
        session: Option<SessionId>,
        respond_to: oneshot::Sender<TeardownOutcome>,
    },

    Publish {
        session: Option<SessionId>,
        on_failure: Option<FailureCallback>,
        respond_to: oneshot::Sender<PublishOutcome>,
    },

    /// A spawned capture task finished.
    PublishSettled {
        token: SessionToken,
        result: Result<LocalCapture, CaptureFailure>,
        on_failure: Option<FailureCallback>,
        respond_to: oneshot::Sender<PublishOutcome>,
    },

    Unpublish {
        session: Option<SessionId>,
        respond_to: oneshot::Sender<TeardownOutcome>,
    },

    SetMuted {
        muted: bool,
        respond_to: oneshot::Sender<()>,
    },
}

impl CoordinatorMessage {
    /// Bounded name for logs.
    pub(crate) const fn message_type(&self) -> &'static str {
        match self {
            CoordinatorMessage::Join { .. } => "join",
            CoordinatorMessage::JoinSettled { .. } => "join_settled",
            CoordinatorMessage::Leave { .. } => "leave",
            CoordinatorMessage::Publish { .. } => "publish",
            CoordinatorMessage::PublishSettled { .. } => "publish_settled",
            CoordinatorMessage::Unpublish { .. } => "unpublish",
            CoordinatorMessage::SetMuted { .. } => "set_muted",
        }
    }
}

/// Result of driving the transport through one join.
#[derive(Debug)]
pub(crate) enum JoinAttempt {
    Joined,
    Superseded(Superseded),
    Failed(TransportError),
}

/// Result of `leave` or `unpublish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// Teardown ran. Individual step failures are in the report.
    Completed(CleanupReport),
    /// The call was refused without touching state or the transport.
    Ignored(IgnoreReason),
}

impl TeardownOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, TeardownOutcome::Completed(_))
    }
}

/// Why a teardown call was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The named session is not the active one.
    Stale {
        requested: SessionId,
        active: Option<SessionId>,
    },
    /// A join is in flight; tearing it down would abort it mid-connect.
    JoinInFlight,
}

/// Result of `publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Local capture is published.
    Published(CaptureKind),
    /// Refused before any capture was attempted.
    Rejected(PublishRejection),
    /// No camera or microphone; the failure callback ran.
    Unavailable,
    /// Capture finished after its session went stale; tracks were released.
    Discarded,
}

/// Why a publish was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishRejection {
    /// The named session is not the active one.
    Stale,
    /// The transport is not `CONNECTED`.
    NotConnected(ConnectionState),
    /// The coordinator has not finished joining.
    NotJoined,
    /// Local capture is already published.
    AlreadyPublished,
    /// A publish for this session is already running.
    InFlight,
}

/// User-facing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserNotice {
    /// No camera or microphone could be used.
    CaptureUnavailable { message: String },
}

/// Logical connection phase, derived from coordinator flags and transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Idle,
    Joining,
    JoinedNotPublishing,
    Publishing,
    LeavingOrFailed,
}

impl ConnectionPhase {
    /// Derive the phase from the coordinator's own flags.
    ///
    /// The transport's connection state is reported next to the phase, not
    /// folded into it: a courtesy leave issued for a stale join may bounce
    /// the shared transport without the active session changing phase.
    #[must_use]
    pub fn derive(leaving: bool, joining: bool, joined: bool, has_capture: bool) -> Self {
        if leaving {
            ConnectionPhase::LeavingOrFailed
        } else if joining {
            ConnectionPhase::Joining
        } else if !joined {
            ConnectionPhase::Idle
        } else if has_capture {
            ConnectionPhase::Publishing
        } else {
            ConnectionPhase::JoinedNotPublishing
        }
    }
}

/// Observable coordinator state, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub active_session: Option<SessionId>,
    pub joining: bool,
    pub joined: bool,
    pub current_room: Option<RoomId>,
    pub phase: ConnectionPhase,
    pub connection: ConnectionState,
    pub local_capture: Option<CaptureKind>,
    pub muted: bool,
    pub remote_peers: Vec<RemotePeer>,
}

impl SessionSnapshot {
    /// Snapshot of a coordinator that has never joined.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            active_session: None,
            joining: false,
            joined: false,
            current_room: None,
            phase: ConnectionPhase::Idle,
            connection: ConnectionState::Disconnected,
            local_capture: None,
            muted: false,
            remote_peers: Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_derivation() {
        assert_eq!(
            ConnectionPhase::derive(false, false, false, false),
            ConnectionPhase::Idle
        );
        assert_eq!(
            ConnectionPhase::derive(false, true, false, false),
            ConnectionPhase::Joining
        );
        assert_eq!(
            ConnectionPhase::derive(false, false, true, false),
            ConnectionPhase::JoinedNotPublishing
        );
        assert_eq!(
            ConnectionPhase::derive(false, false, true, true),
            ConnectionPhase::Publishing
        );
        assert_eq!(
            ConnectionPhase::derive(true, false, true, true),
            ConnectionPhase::LeavingOrFailed
        );
    }

    #[test]
    fn test_idle_snapshot() {
        let snapshot = SessionSnapshot::idle();
        assert_eq!(snapshot.phase, ConnectionPhase::Idle);
        assert!(!snapshot.joined);
        assert!(snapshot.remote_peers.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_for_ui() {
        let json = serde_json::to_value(SessionSnapshot::idle()).unwrap();
        assert_eq!(json["phase"], "idle");
        assert_eq!(json["connection"], "DISCONNECTED");
        assert!(json["active_session"].is_null());
    }

    #[test]
    fn test_user_notice_serialization() {
        let notice = UserNotice::CaptureUnavailable {
            message: "no devices".to_string(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["kind"], "capture_unavailable");
        assert_eq!(json["message"], "no devices");
    }

    #[test]
    fn test_teardown_outcome_helpers() {
        assert!(TeardownOutcome::Completed(CleanupReport::new()).is_completed());
        assert!(!TeardownOutcome::Ignored(IgnoreReason::JoinInFlight).is_completed());
    }
}
