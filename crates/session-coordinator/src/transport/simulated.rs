//! In-process simulated transport and capture devices.
//!
//! Behaves like a real engine where it matters to the coordinator:
//! - `join` and `leave` take time and move through intermediate states
//! - a `leave` issued while a `join` is connecting aborts that join
//! - `publish`/`subscribe` require `CONNECTED`
//! - remote peers already in the room are announced after connecting

use async_trait::async_trait;
use common::types::PeerId;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{
    AtomicConnectionState, ClientRole, ConnectionState, LocalTrack, MediaKind, TrackHandle,
    Transport, TransportEvent,
};
use crate::capture::CaptureDevices;
use crate::errors::{CaptureError, TransportError};
use crate::membership::RoomMembership;
use crate::peers::PeerEvent;

/// Transport event buffer.
const EVENT_BUFFER: usize = 256;

/// Simulated media engine.
#[derive(Debug)]
pub struct SimulatedTransport {
    state: AtomicConnectionState,
    events: broadcast::Sender<TransportEvent>,
    latency: Duration,
    remote_peers: Vec<PeerId>,
    /// Bumped by every `leave`; a connecting `join` that sees it move aborts.
    leave_epoch: AtomicU64,
    host: AtomicBool,
    published: AtomicUsize,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new(latency: Duration, remote_peers: Vec<PeerId>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            state: AtomicConnectionState::default(),
            events,
            latency,
            remote_peers,
            leave_epoch: AtomicU64::new(0),
            host: AtomicBool::new(false),
            published: AtomicUsize::new(0),
        })
    }

    /// Number of local tracks currently published.
    #[must_use]
    pub fn published_tracks(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.swap(next);
        if previous != next {
            debug!(
                target: "sc.transport.sim",
                previous = %previous,
                current = %next,
                "Connection state changed"
            );
            let _ = self.events.send(TransportEvent::ConnectionStateChanged {
                previous,
                current: next,
            });
        }
    }

    fn emit_peer(&self, event: PeerEvent) {
        let _ = self.events.send(TransportEvent::Peer(event));
    }

    fn require_connected(&self, operation: &str) -> Result<(), TransportError> {
        match self.state.load() {
            ConnectionState::Connected => Ok(()),
            other => Err(TransportError::InvalidState(format!(
                "{operation} requires CONNECTED, state is {other}"
            ))),
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn connection_state(&self) -> ConnectionState {
        self.state.load()
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn set_role(&self, role: ClientRole) -> Result<(), TransportError> {
        self.host.store(role == ClientRole::Host, Ordering::SeqCst);
        Ok(())
    }

    async fn join(&self, app_id: &str, membership: &RoomMembership) -> Result<(), TransportError> {
        match self.state.load() {
            ConnectionState::Disconnected => {}
            other => {
                return Err(TransportError::InvalidState(format!(
                    "join requires DISCONNECTED, state is {other}"
                )))
            }
        }

        let epoch = self.leave_epoch.load(Ordering::SeqCst);
        self.transition(ConnectionState::Connecting);

        tokio::time::sleep(self.latency).await;

        if self.leave_epoch.load(Ordering::SeqCst) != epoch {
            return Err(TransportError::Aborted(
                "leave called while connecting".to_string(),
            ));
        }

        self.transition(ConnectionState::Connected);
        info!(
            target: "sc.transport.sim",
            app_id = %app_id,
            room = %membership.room(),
            local_uid = ?membership.local_uid().map(|p| p.0),
            host = self.host.load(Ordering::SeqCst),
            "Connected"
        );

        for &peer in &self.remote_peers {
            self.emit_peer(PeerEvent::Joined { peer });
            self.emit_peer(PeerEvent::Published {
                peer,
                kind: MediaKind::Audio,
            });
            self.emit_peer(PeerEvent::Published {
                peer,
                kind: MediaKind::Video,
            });
        }

        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.leave_epoch.fetch_add(1, Ordering::SeqCst);

        if self.state.load() == ConnectionState::Disconnected {
            return Ok(());
        }

        self.transition(ConnectionState::Disconnecting);
        tokio::time::sleep(self.latency / 2).await;
        self.published.store(0, Ordering::SeqCst);
        self.transition(ConnectionState::Disconnected);
        Ok(())
    }

    async fn publish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError> {
        self.require_connected("publish")?;
        if !self.host.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected(
                "audience role cannot publish".to_string(),
            ));
        }
        self.published.fetch_add(tracks.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn unpublish(&self, track: &TrackHandle) -> Result<(), TransportError> {
        self.require_connected("unpublish")?;
        let _ = self
            .published
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        debug!(
            target: "sc.transport.sim",
            kind = track.kind().as_str(),
            "Unpublished track"
        );
        Ok(())
    }

    async fn subscribe(&self, peer: PeerId, kind: MediaKind) -> Result<(), TransportError> {
        self.require_connected("subscribe")?;
        debug!(
            target: "sc.transport.sim",
            peer_id = %peer,
            kind = kind.as_str(),
            "Subscribed to remote media"
        );
        Ok(())
    }
}

/// Simulated local track.
#[derive(Debug)]
pub struct SimulatedTrack {
    kind: MediaKind,
    muted: AtomicBool,
    closed: AtomicBool,
}

impl SimulatedTrack {
    #[must_use]
    pub fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            muted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LocalTrack for SimulatedTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    fn close(&self) -> Result<(), CaptureError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulated camera and microphone. Absent devices fail to open.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedDevices {
    pub camera: bool,
    pub microphone: bool,
}

#[async_trait]
impl CaptureDevices for SimulatedDevices {
    async fn microphone_and_camera(&self) -> Result<(TrackHandle, TrackHandle), CaptureError> {
        if !self.microphone {
            return Err(CaptureError::DeviceNotFound("microphone".to_string()));
        }
        if !self.camera {
            return Err(CaptureError::DeviceNotFound("camera".to_string()));
        }

        let audio: TrackHandle = SimulatedTrack::new(MediaKind::Audio);
        let video: TrackHandle = SimulatedTrack::new(MediaKind::Video);
        Ok((audio, video))
    }

    async fn microphone(&self) -> Result<TrackHandle, CaptureError> {
        if !self.microphone {
            return Err(CaptureError::DeviceNotFound("microphone".to_string()));
        }
        let audio: TrackHandle = SimulatedTrack::new(MediaKind::Audio);
        Ok(audio)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn membership() -> RoomMembership {
        RoomMembership::new("sim-room", None, Some(7), ClientRole::Host)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_connects_and_announces_peers() {
        let transport = SimulatedTransport::new(Duration::from_millis(100), vec![PeerId(9)]);
        let mut events = transport.events();

        transport.set_role(ClientRole::Host).await.unwrap();
        transport.join("app", &membership()).await.unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::Connected);

        let mut peer_events = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::Peer(peer_event) = event {
                peer_events.push(peer_event);
            }
        }
        assert_eq!(
            peer_events,
            vec![
                PeerEvent::Joined { peer: PeerId(9) },
                PeerEvent::Published {
                    peer: PeerId(9),
                    kind: MediaKind::Audio
                },
                PeerEvent::Published {
                    peer: PeerId(9),
                    kind: MediaKind::Video
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_during_join_aborts_it() {
        let transport = SimulatedTransport::new(Duration::from_millis(100), Vec::new());

        let joining = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.join("app", &membership()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(transport.connection_state(), ConnectionState::Connecting);

        transport.leave().await.unwrap();
        let result = joining.await.unwrap();

        assert!(matches!(result, Err(TransportError::Aborted(_))));
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_requires_connected_host() {
        let transport = SimulatedTransport::new(Duration::from_millis(10), Vec::new());
        let track: TrackHandle = SimulatedTrack::new(MediaKind::Audio);

        let err = transport.publish(&[track.clone()]).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidState(_)));

        transport.set_role(ClientRole::Audience).await.unwrap();
        transport.join("app", &membership()).await.unwrap();
        let err = transport.publish(&[track.clone()]).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));

        transport.set_role(ClientRole::Host).await.unwrap();
        transport.publish(&[track.clone()]).await.unwrap();
        assert_eq!(transport.published_tracks(), 1);

        transport.unpublish(&track).await.unwrap();
        assert_eq!(transport.published_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_twice_is_invalid() {
        let transport = SimulatedTransport::new(Duration::from_millis(10), Vec::new());
        transport.join("app", &membership()).await.unwrap();

        let err = transport.join("app", &membership()).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_devices_fail_when_absent() {
        let no_camera = SimulatedDevices {
            camera: false,
            microphone: true,
        };
        assert!(matches!(
            no_camera.microphone_and_camera().await,
            Err(CaptureError::DeviceNotFound(_))
        ));
        assert_eq!(no_camera.microphone().await.unwrap().kind(), MediaKind::Audio);

        let nothing = SimulatedDevices {
            camera: false,
            microphone: false,
        };
        assert!(nothing.microphone().await.is_err());
    }
}
