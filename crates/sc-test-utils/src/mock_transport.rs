//! Scriptable mock transport.
//!
//! Joins follow a script of steps pushed ahead of time. An empty script
//! means "join succeeds immediately". A gated step suspends the join until
//! the test releases its [`JoinGate`], which is how tests hold a join in
//! flight while they issue overlapping calls.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockTransport::new();
//! let gate = transport.push_gated_join();
//! // ... start a join, it is now suspended inside transport.join()
//! gate.succeed();
//! ```

use async_trait::async_trait;
use common::types::{PeerId, RoomId};
use session_coordinator::errors::TransportError;
use session_coordinator::membership::RoomMembership;
use session_coordinator::peers::PeerEvent;
use session_coordinator::transport::{
    AtomicConnectionState, ClientRole, ConnectionState, MediaKind, TrackHandle, Transport,
    TransportEvent,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};

/// One scripted join.
enum JoinStep {
    Immediate(Result<(), TransportError>),
    Gated(oneshot::Receiver<Result<(), TransportError>>),
}

/// Releases a gated join.
pub struct JoinGate {
    tx: oneshot::Sender<Result<(), TransportError>>,
}

impl JoinGate {
    /// Let the join finish with `result`.
    pub fn release(self, result: Result<(), TransportError>) {
        let _ = self.tx.send(result);
    }

    pub fn succeed(self) {
        self.release(Ok(()));
    }

    pub fn fail(self, error: TransportError) {
        self.release(Err(error));
    }
}

#[derive(Default)]
struct Inner {
    join_script: VecDeque<JoinStep>,
    joined_rooms: Vec<RoomId>,
    roles: Vec<ClientRole>,
    published: Vec<MediaKind>,
    subscriptions: Vec<(PeerId, MediaKind)>,
}

/// Mock media transport.
pub struct MockTransport {
    state: AtomicConnectionState,
    events: broadcast::Sender<TransportEvent>,
    inner: Mutex<Inner>,
    set_role_calls: AtomicUsize,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    publish_calls: AtomicUsize,
    unpublish_calls: AtomicUsize,
    fail_leave: AtomicBool,
    fail_unpublish: AtomicBool,
    fail_publish: AtomicBool,
}

impl MockTransport {
    /// Disconnected transport whose joins succeed immediately.
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            state: AtomicConnectionState::default(),
            events,
            inner: Mutex::new(Inner::default()),
            set_role_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
            leave_calls: AtomicUsize::new(0),
            publish_calls: AtomicUsize::new(0),
            unpublish_calls: AtomicUsize::new(0),
            fail_leave: AtomicBool::new(false),
            fail_unpublish: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        })
    }

    /// Script the next join to finish immediately with `result`.
    pub fn push_join_result(&self, result: Result<(), TransportError>) {
        self.inner
            .lock()
            .unwrap()
            .join_script
            .push_back(JoinStep::Immediate(result));
    }

    /// Script the next join to wait for the returned gate.
    ///
    /// Dropping the gate fails the join with `Aborted`.
    pub fn push_gated_join(&self) -> JoinGate {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .unwrap()
            .join_script
            .push_back(JoinStep::Gated(rx));
        JoinGate { tx }
    }

    pub fn set_fail_leave(&self, fail: bool) {
        self.fail_leave.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unpublish(&self, fail: bool) {
        self.fail_unpublish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Force the connection state, emitting a change event.
    pub fn force_state(&self, state: ConnectionState) {
        self.transition(state);
    }

    /// Emit a transport event as if the engine produced it.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_peer(&self, event: PeerEvent) {
        self.emit(TransportEvent::Peer(event));
    }

    pub fn set_role_calls(&self) -> usize {
        self.set_role_calls.load(Ordering::SeqCst)
    }

    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    pub fn leave_calls(&self) -> usize {
        self.leave_calls.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn unpublish_calls(&self) -> usize {
        self.unpublish_calls.load(Ordering::SeqCst)
    }

    /// Rooms passed to `join`, in call order.
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.inner.lock().unwrap().joined_rooms.clone()
    }

    /// Roles passed to `set_role`, in call order.
    pub fn roles(&self) -> Vec<ClientRole> {
        self.inner.lock().unwrap().roles.clone()
    }

    /// Kinds currently published.
    pub fn published_kinds(&self) -> Vec<MediaKind> {
        self.inner.lock().unwrap().published.clone()
    }

    /// `(peer, kind)` pairs passed to `subscribe`.
    pub fn subscriptions(&self) -> Vec<(PeerId, MediaKind)> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    /// Yield until `join` has been called at least `count` times.
    pub async fn wait_for_join_calls(&self, count: usize) {
        while self.join_calls() < count {
            tokio::task::yield_now().await;
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.swap(next);
        if previous != next {
            self.emit(TransportEvent::ConnectionStateChanged {
                previous,
                current: next,
            });
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn connection_state(&self) -> ConnectionState {
        self.state.load()
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn set_role(&self, role: ClientRole) -> Result<(), TransportError> {
        self.set_role_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().unwrap().roles.push(role);
        Ok(())
    }

    async fn join(&self, _app_id: &str, membership: &RoomMembership) -> Result<(), TransportError> {
        let step = {
            let mut inner = self.inner.lock().unwrap();
            inner.joined_rooms.push(membership.room().clone());
            inner.join_script.pop_front()
        };
        self.transition(ConnectionState::Connecting);
        self.join_calls.fetch_add(1, Ordering::SeqCst);

        let result = match step {
            None => Ok(()),
            Some(JoinStep::Immediate(result)) => result,
            Some(JoinStep::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(TransportError::Aborted("join gate dropped".to_string()))),
        };

        match &result {
            Ok(()) => self.transition(ConnectionState::Connected),
            Err(_) => self.transition(ConnectionState::Disconnected),
        }
        result
    }

    async fn leave(&self) -> Result<(), TransportError> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(TransportError::Network("leave timed out".to_string()));
        }
        self.inner.lock().unwrap().published.clear();
        self.transition(ConnectionState::Disconnected);
        Ok(())
    }

    async fn publish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("publish refused".to_string()));
        }
        if self.state.load() != ConnectionState::Connected {
            return Err(TransportError::InvalidState("not connected".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.published.extend(tracks.iter().map(|t| t.kind()));
        Ok(())
    }

    async fn unpublish(&self, track: &TrackHandle) -> Result<(), TransportError> {
        self.unpublish_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unpublish.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidState("track not published".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        let kind = track.kind();
        if let Some(pos) = inner.published.iter().position(|k| *k == kind) {
            inner.published.remove(pos);
        }
        Ok(())
    }

    async fn subscribe(&self, peer: PeerId, kind: MediaKind) -> Result<(), TransportError> {
        self.inner.lock().unwrap().subscriptions.push((peer, kind));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::host_membership;

    #[tokio::test]
    async fn test_unscripted_join_connects() {
        let transport = MockTransport::new();
        transport.join("app", &host_membership("r1")).await.unwrap();

        assert_eq!(transport.connection_state(), ConnectionState::Connected);
        assert_eq!(transport.join_calls(), 1);
        assert_eq!(transport.joined_rooms(), vec![RoomId::from("r1")]);
    }

    #[tokio::test]
    async fn test_scripted_failure_disconnects() {
        let transport = MockTransport::new();
        transport.push_join_result(Err(TransportError::Rejected("banned".to_string())));

        let err = transport.join("app", &host_membership("r1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
        assert_eq!(transport.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_gated_join_waits_for_release() {
        let transport = MockTransport::new();
        let gate = transport.push_gated_join();

        let join = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.join("app", &host_membership("r1")).await })
        };
        transport.wait_for_join_calls(1).await;
        assert_eq!(transport.connection_state(), ConnectionState::Connecting);

        gate.succeed();
        join.await.unwrap().unwrap();
        assert_eq!(transport.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_dropped_gate_aborts_join() {
        let transport = MockTransport::new();
        drop(transport.push_gated_join());

        let err = transport.join("app", &host_membership("r1")).await.unwrap_err();
        assert!(matches!(err, TransportError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_failing_leave_keeps_state() {
        let transport = MockTransport::new();
        transport.join("app", &host_membership("r1")).await.unwrap();
        transport.set_fail_leave(true);

        assert!(transport.leave().await.is_err());
        assert_eq!(transport.leave_calls(), 1);
        assert_eq!(transport.connection_state(), ConnectionState::Connected);
    }
}
