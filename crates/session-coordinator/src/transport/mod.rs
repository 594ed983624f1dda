//! Media transport abstraction.
//!
//! The transport is the real-time media engine: a black box with its own
//! connection state and asynchronous, fallible `join`/`leave`/`publish`/
//! `unpublish` primitives. It offers no protection against being invoked out
//! of order; that is the coordinator's job.
//!
//! Implementations:
//! - [`simulated::SimulatedTransport`] - in-process engine with configurable
//!   latency, used by the `session-sim` binary
//! - test mocks live in the `sc-test-utils` crate

pub mod simulated;

use async_trait::async_trait;
use common::types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::errors::{CaptureError, TransportError};
use crate::membership::RoomMembership;
use crate::peers::PeerEvent;

/// Connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
}

impl ConnectionState {
    /// Bounded label for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
            ConnectionState::Disconnecting => "DISCONNECTING",
        }
    }

    const fn to_repr(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Disconnecting => 4,
        }
    }

    const fn from_repr(repr: u8) -> Self {
        match repr {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding a [`ConnectionState`].
///
/// Lets transports answer `connection_state()` synchronously while their
/// async operations update it.
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    #[must_use]
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.to_repr()))
    }

    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_repr(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state.to_repr(), Ordering::SeqCst);
    }

    /// Store `state`, returning the previous one.
    pub fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_repr(self.0.swap(state.to_repr(), Ordering::SeqCst))
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

/// Role in a live room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// May publish local media.
    Host,
    /// Receive-only.
    Audience,
}

impl ClientRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Host => "host",
            ClientRole::Audience => "audience",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(ClientRole::Host),
            "audience" => Ok(ClientRole::Audience),
            other => Err(format!("unknown role '{other}' (expected host or audience)")),
        }
    }
}

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// A local capture track (microphone or camera) owned by the capture manager.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    /// Kind of media this track carries.
    fn kind(&self) -> MediaKind;

    /// Mute or unmute the track without unpublishing it.
    fn set_muted(&self, muted: bool);

    /// Release the underlying device. Closing twice is allowed.
    fn close(&self) -> Result<(), CaptureError>;
}

/// Shared handle to a local track.
pub type TrackHandle = Arc<dyn LocalTrack>;

/// Event emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Remote peer presence or publish change.
    Peer(PeerEvent),
    /// The transport's own connection state changed.
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
}

/// The real-time media engine.
///
/// Every async method is a suspension point for the coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Subscribe to peer and connection events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Set the client role used by the next join.
    async fn set_role(&self, role: ClientRole) -> Result<(), TransportError>;

    /// Connect to a room.
    async fn join(&self, app_id: &str, membership: &RoomMembership) -> Result<(), TransportError>;

    /// Disconnect from the current room.
    async fn leave(&self) -> Result<(), TransportError>;

    /// Publish local tracks.
    async fn publish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError>;

    /// Stop publishing one local track.
    async fn unpublish(&self, track: &TrackHandle) -> Result<(), TransportError>;

    /// Receive a remote peer's media of the given kind.
    async fn subscribe(&self, peer: PeerId, kind: MediaKind) -> Result<(), TransportError>;
}
