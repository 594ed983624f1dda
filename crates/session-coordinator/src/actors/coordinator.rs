//! `SessionCoordinator` - single owner of the media session lifecycle.
//!
//! The coordinator actor is the only writer of session state: the fence
//! register, the joining/joined flags, the current room, the local capture
//! and the remote peer registry. Callers talk to it through a cloneable
//! [`SessionCoordinatorHandle`].
//!
//! # Concurrency
//!
//! `join` and `publish` drive the transport across several suspension
//! points. Those workflows run in spawned tasks that carry a
//! [`SessionToken`] and report back with a settle message, so the mailbox
//! keeps draining while a join is in flight (a second `join`, a `leave`, a
//! `switch_room` all get an answer immediately). Every settle message is
//! re-checked against the fence before it is applied; results for a stale
//! session are dropped and their resources released.
//!
//! `leave` and `unpublish` run inline. Their transport calls are
//! best-effort: failures land in the returned [`CleanupReport`].
//!
//! # Shutdown
//!
//! Cancelling the root `CancellationToken` makes the actor run one last
//! best-effort teardown and exit. A join still in flight finds the actor
//! gone when it settles and leaves the connection it made.

use common::types::RoomId;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{
    ConnectionPhase, CoordinatorMessage, FailureCallback, IgnoreReason, JoinAttempt, JoinMode,
    PublishOutcome, PublishRejection, SessionSnapshot, TeardownOutcome, UserNotice,
};
use crate::capture::{CaptureDevices, LocalCapture, LocalCaptureManager};
use crate::cleanup::{CleanupReport, CleanupStep};
use crate::config::Config;
use crate::errors::{CaptureFailure, SessionError};
use crate::fence::{SessionFence, SessionId, SessionToken};
use crate::membership::RoomMembership;
use crate::observability::metrics::{
    record_join_attempt, record_join_duration, record_publish, set_remote_peers,
};
use crate::peers::{PeerEvent, PeerRegistry};
use crate::transport::{ClientRole, ConnectionState, Transport, TransportEvent};

/// Handle to the `SessionCoordinator` actor.
///
/// Cheap to clone. Every method except the snapshot accessors round-trips
/// through the actor mailbox.
#[derive(Clone)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notices: broadcast::Sender<UserNotice>,
    cancel_token: CancellationToken,
    default_role: ClientRole,
}

impl SessionCoordinatorHandle {
    /// Join `room`. Returns the new session id on success.
    ///
    /// Returns `Ok(None)` when the join was refused (another join in
    /// flight), failed, or was superseded. If already connected to `room`
    /// the active session id is returned without touching the transport.
    /// `role` defaults to the configured role.
    pub async fn join(
        &self,
        room: impl Into<RoomId>,
        credential: Option<&str>,
        local_uid: Option<u64>,
        role: Option<ClientRole>,
    ) -> Result<Option<SessionId>, SessionError> {
        let membership = RoomMembership::new(
            room,
            credential,
            local_uid,
            role.unwrap_or(self.default_role),
        );
        self.join_membership(membership).await
    }

    /// Join with a prepared membership.
    pub async fn join_membership(
        &self,
        membership: RoomMembership,
    ) -> Result<Option<SessionId>, SessionError> {
        self.request_join(membership, JoinMode::RejectInFlight).await
    }

    /// Join `membership` even if another join is in flight.
    ///
    /// The in-flight join becomes stale: its result is discarded and, if it
    /// connected anyway, it is disconnected.
    pub async fn switch_room(
        &self,
        membership: RoomMembership,
    ) -> Result<Option<SessionId>, SessionError> {
        self.request_join(membership, JoinMode::Supersede).await
    }

    /// Leave the room. `session` defaults to the active session.
    pub async fn leave(&self, session: Option<SessionId>) -> Result<TeardownOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Leave {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::CoordinatorStopped(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::CoordinatorStopped(format!("response receive failed: {e}")))
    }

    /// Capture and publish local media for `session` (default: active).
    ///
    /// `on_failure` runs exactly once if neither camera+mic nor mic-only
    /// capture is possible.
    pub async fn publish(
        &self,
        session: Option<SessionId>,
        on_failure: Option<FailureCallback>,
    ) -> Result<PublishOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Publish {
                session,
                on_failure,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::CoordinatorStopped(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::CoordinatorStopped(format!("response receive failed: {e}")))
    }

    /// Stop publishing and release local capture. The room is kept.
    pub async fn unpublish(
        &self,
        session: Option<SessionId>,
    ) -> Result<TeardownOutcome, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Unpublish {
                session,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::CoordinatorStopped(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::CoordinatorStopped(format!("response receive failed: {e}")))
    }

    /// Mute or unmute the local microphone. Remembered across publishes.
    pub async fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::SetMuted {
                muted,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::CoordinatorStopped(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::CoordinatorStopped(format!("response receive failed: {e}")))
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Receiver for user-facing notices.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<UserNotice> {
        self.notices.subscribe()
    }

    /// Cancel the actor. It tears the session down and exits.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn request_join(
        &self,
        membership: RoomMembership,
        mode: JoinMode,
    ) -> Result<Option<SessionId>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Join {
                membership,
                mode,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::CoordinatorStopped(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::CoordinatorStopped(format!("response receive failed: {e}")))
    }
}

/// Mutable session state. Only the actor touches it.
#[derive(Default)]
struct SessionState {
    joining: bool,
    joined: bool,
    leaving: bool,
    /// Session whose publish is running, if any.
    publishing: Option<SessionId>,
    /// Running publish that was unpublished before it settled.
    publish_cancelled: Option<SessionId>,
    current_room: Option<RoomId>,
    capture: Option<LocalCapture>,
    muted: bool,
    peers: PeerRegistry,
}

/// The `SessionCoordinator` actor.
pub struct SessionCoordinator {
    app_id: Arc<str>,
    transport: Arc<dyn Transport>,
    capture: LocalCaptureManager,
    fence: Arc<SessionFence>,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Given to spawned workflows so they can report back without keeping
    /// the mailbox open on their own.
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    events: broadcast::Receiver<TransportEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    notices: broadcast::Sender<UserNotice>,
    cancel_token: CancellationToken,
    state: SessionState,
}

impl SessionCoordinator {
    /// Spawn the coordinator actor.
    ///
    /// Subscribes to transport events before returning, so no event
    /// emitted after `spawn` is missed.
    pub fn spawn(
        config: &Config,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn CaptureDevices>,
        cancel_token: CancellationToken,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::idle());
        let (notices, _) = broadcast::channel(config.notice_capacity);

        let actor = Self {
            app_id: Arc::from(config.app_id.as_str()),
            events: transport.events(),
            capture: LocalCaptureManager::new(devices, Arc::clone(&transport)),
            transport,
            fence: SessionFence::new(),
            receiver,
            self_sender: sender.downgrade(),
            snapshot: snapshot_tx,
            notices: notices.clone(),
            cancel_token: cancel_token.clone(),
            state: SessionState::default(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionCoordinatorHandle {
            sender,
            snapshot: snapshot_rx,
            notices,
            cancel_token,
            default_role: config.default_role,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sc.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "sc.actor.coordinator", "SessionCoordinator started");

        let mut events_open = true;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.coordinator",
                        "SessionCoordinator received cancellation signal"
                    );
                    self.shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "sc.actor.coordinator",
                                "SessionCoordinator channel closed, exiting"
                            );
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                event = self.events.recv(), if events_open => {
                    match event {
                        Ok(event) => self.handle_transport_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "sc.actor.coordinator",
                                skipped = skipped,
                                "Transport events lagged, peer registry may be incomplete"
                            );
                        }
                        Err(RecvError::Closed) => {
                            debug!(
                                target: "sc.actor.coordinator",
                                "Transport event stream closed"
                            );
                            events_open = false;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.coordinator",
            active_session = ?self.fence.active().map(SessionId::get),
            "SessionCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        trace!(
            target: "sc.actor.coordinator",
            message = message.message_type(),
            "Handling message"
        );

        match message {
            CoordinatorMessage::Join {
                membership,
                mode,
                respond_to,
            } => self.start_join(membership, mode, respond_to),

            CoordinatorMessage::JoinSettled {
                token,
                room,
                attempt,
                started,
                respond_to,
            } => {
                let result = self.settle_join(&token, room, attempt, started);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Leave {
                session,
                respond_to,
            } => {
                let outcome = self.leave(session).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::Publish {
                session,
                on_failure,
                respond_to,
            } => self.start_publish(session, on_failure, respond_to),

            CoordinatorMessage::PublishSettled {
                token,
                result,
                on_failure,
                respond_to,
            } => {
                let outcome = self.settle_publish(&token, result, on_failure);
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::Unpublish {
                session,
                respond_to,
            } => {
                let outcome = self.unpublish(session).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::SetMuted { muted, respond_to } => {
                self.set_muted(muted);
                let _ = respond_to.send(());
            }
        }
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    fn start_join(
        &mut self,
        membership: RoomMembership,
        mode: JoinMode,
        respond_to: oneshot::Sender<Option<SessionId>>,
    ) {
        let room = membership.room().clone();

        if self.state.joining && mode == JoinMode::RejectInFlight {
            warn!(
                target: "sc.actor.coordinator",
                room = %room,
                "Join rejected: already joining"
            );
            record_join_attempt("rejected_in_flight");
            let _ = respond_to.send(None);
            return;
        }

        let connection = self.transport.connection_state();
        if !self.state.joining
            && self.state.current_room.as_ref() == Some(&room)
            && connection != ConnectionState::Disconnected
        {
            debug!(
                target: "sc.actor.coordinator",
                room = %room,
                connection = %connection,
                "Already joined this room"
            );
            record_join_attempt("already_joined");
            let _ = respond_to.send(self.fence.active());
            return;
        }

        let Some(sender) = self.self_sender.upgrade() else {
            record_join_attempt("stopped");
            let _ = respond_to.send(None);
            return;
        };

        let token = self.fence.mint();
        self.take_over_previous_session();
        self.state.joining = true;
        self.publish_snapshot();

        info!(
            target: "sc.actor.coordinator",
            session_id = %token.id(),
            room = %room,
            role = %membership.role(),
            superseding = mode == JoinMode::Supersede,
            "Joining room"
        );

        tokio::spawn(run_join(JoinTask {
            token,
            membership,
            app_id: Arc::clone(&self.app_id),
            transport: Arc::clone(&self.transport),
            sender,
            respond_to,
            started: Instant::now(),
        }));
    }

    /// Drop what an older session left behind so the new one starts clean.
    ///
    /// Capture is closed without unpublishing: the new join's pre-join
    /// leave drops the old publications.
    fn take_over_previous_session(&mut self) {
        if let Some(capture) = self.state.capture.take() {
            debug!(
                target: "sc.actor.coordinator",
                kind = capture.kind().as_str(),
                "Closing capture left by previous session"
            );
            let _ = capture.close();
        }

        if !self.state.peers.is_empty() {
            self.state.peers.clear();
            set_remote_peers(0);
        }

        self.state.joined = false;
        self.state.current_room = None;
    }

    fn settle_join(
        &mut self,
        token: &SessionToken,
        room: RoomId,
        attempt: JoinAttempt,
        started: Instant,
    ) -> Option<SessionId> {
        let current = token.is_current();
        record_join_duration(started.elapsed());

        let result = match attempt {
            JoinAttempt::Joined if current => {
                info!(
                    target: "sc.actor.coordinator",
                    session_id = %token.id(),
                    room = %room,
                    "Joined room"
                );
                self.state.current_room = Some(room);
                self.state.joined = true;
                record_join_attempt("joined");
                Some(token.id())
            }
            JoinAttempt::Joined => {
                // Went stale after the task's last check. The newer join
                // found this connection up and left it before joining.
                let _ = token.ensure_current("join_settled");
                record_join_attempt("superseded");
                None
            }
            JoinAttempt::Superseded(superseded) => {
                debug!(
                    target: "sc.actor.coordinator",
                    session_id = %superseded.session,
                    stage = superseded.stage,
                    "Join superseded"
                );
                record_join_attempt("superseded");
                None
            }
            JoinAttempt::Failed(e) => {
                error!(
                    target: "sc.actor.coordinator",
                    session_id = %token.id(),
                    room = %room,
                    error = %e,
                    current = current,
                    "Join failed"
                );
                if current {
                    self.state.current_room = None;
                    self.state.joined = false;
                }
                record_join_attempt("failed");
                None
            }
        };

        // A newer join owns the flag otherwise.
        if current {
            self.state.joining = false;
        }

        self.publish_snapshot();
        result
    }

    // ------------------------------------------------------------------
    // Leave
    // ------------------------------------------------------------------

    async fn leave(&mut self, session: Option<SessionId>) -> TeardownOutcome {
        if let Some(reason) = self.stale_reason(session) {
            return TeardownOutcome::Ignored(reason);
        }

        if self.state.joining {
            warn!(
                target: "sc.actor.coordinator",
                session_id = ?self.fence.active().map(SessionId::get),
                "Leave ignored: currently joining"
            );
            return TeardownOutcome::Ignored(IgnoreReason::JoinInFlight);
        }

        TeardownOutcome::Completed(self.teardown().await)
    }

    /// Release capture, clear peers, leave the transport, clear the fence.
    async fn teardown(&mut self) -> CleanupReport {
        self.state.leaving = true;
        self.publish_snapshot();

        let session = self.fence.active();
        let mut report = CleanupReport::new();

        if let Some(capture) = self.state.capture.take() {
            report.merge(capture.release(self.transport.as_ref()).await);
        }

        self.state.peers.clear();
        set_remote_peers(0);
        self.state.joined = false;
        self.state.current_room = None;

        if self.transport.connection_state() != ConnectionState::Disconnected {
            report.record(CleanupStep::TransportLeave, self.transport.leave().await);
        }

        self.fence.clear();
        self.state.leaving = false;
        self.publish_snapshot();

        info!(
            target: "sc.actor.coordinator",
            session_id = ?session.map(SessionId::get),
            failures = report.failures().len(),
            "Left room"
        );

        report
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    fn start_publish(
        &mut self,
        session: Option<SessionId>,
        on_failure: Option<FailureCallback>,
        respond_to: oneshot::Sender<PublishOutcome>,
    ) {
        let token = match self.check_publish(session) {
            Ok(token) => token,
            Err(rejection) => {
                record_publish("rejected");
                let _ = respond_to.send(PublishOutcome::Rejected(rejection));
                return;
            }
        };

        let Some(sender) = self.self_sender.upgrade() else {
            let _ = respond_to.send(PublishOutcome::Discarded);
            return;
        };

        self.state.publishing = Some(token.id());
        self.state.publish_cancelled = None;
        debug!(
            target: "sc.actor.coordinator",
            session_id = %token.id(),
            "Starting publish"
        );

        let manager = self.capture.clone();
        tokio::spawn(async move {
            let result = manager.acquire(&token).await;
            let message = CoordinatorMessage::PublishSettled {
                token,
                result,
                on_failure,
                respond_to,
            };

            if let Err(mpsc::error::SendError(message)) = sender.send(message).await {
                warn!(
                    target: "sc.actor.coordinator",
                    "Coordinator gone before publish settled, releasing capture"
                );
                if let CoordinatorMessage::PublishSettled {
                    result: Ok(capture),
                    respond_to,
                    ..
                } = message
                {
                    let _ = manager.discard(capture).await;
                    let _ = respond_to.send(PublishOutcome::Discarded);
                }
            }
        });
    }

    fn check_publish(&self, session: Option<SessionId>) -> Result<SessionToken, PublishRejection> {
        if self.stale_reason(session).is_some() {
            return Err(PublishRejection::Stale);
        }

        let connection = self.transport.connection_state();
        if connection != ConnectionState::Connected {
            error!(
                target: "sc.actor.coordinator",
                connection = %connection,
                "Cannot publish: client not connected"
            );
            return Err(PublishRejection::NotConnected(connection));
        }

        if !self.state.joined {
            warn!(target: "sc.actor.coordinator", "Cannot publish: not joined");
            return Err(PublishRejection::NotJoined);
        }

        if self.state.capture.is_some() {
            warn!(target: "sc.actor.coordinator", "Already published");
            return Err(PublishRejection::AlreadyPublished);
        }

        if self
            .state
            .publishing
            .is_some_and(|id| self.fence.is_active(id))
        {
            warn!(target: "sc.actor.coordinator", "Publish already in progress");
            return Err(PublishRejection::InFlight);
        }

        // Joined implies an active session.
        self.fence
            .active_token()
            .ok_or(PublishRejection::NotJoined)
    }

    fn settle_publish(
        &mut self,
        token: &SessionToken,
        result: Result<LocalCapture, CaptureFailure>,
        on_failure: Option<FailureCallback>,
    ) -> PublishOutcome {
        if self.state.publishing == Some(token.id()) {
            self.state.publishing = None;
        }
        let cancelled = self.state.publish_cancelled == Some(token.id());
        if cancelled {
            self.state.publish_cancelled = None;
        }

        let outcome = match result {
            Ok(capture)
                if !cancelled
                    && token.is_current()
                    && self.state.joined
                    && self.state.capture.is_none() =>
            {
                capture.set_muted(self.state.muted);
                let kind = capture.kind();
                self.state.capture = Some(capture);
                record_publish(kind.as_str());
                PublishOutcome::Published(kind)
            }
            Ok(capture) => {
                let _ = token.ensure_current("publish_settled");
                let manager = self.capture.clone();
                tokio::spawn(async move {
                    let _ = manager.discard(capture).await;
                });
                record_publish("discarded");
                PublishOutcome::Discarded
            }
            Err(CaptureFailure::Superseded(_)) => {
                record_publish("discarded");
                PublishOutcome::Discarded
            }
            Err(failure @ CaptureFailure::Unavailable { .. }) => {
                if let Some(message) = failure.user_message() {
                    let _ = self.notices.send(UserNotice::CaptureUnavailable {
                        message: message.to_string(),
                    });
                }
                if let Some(callback) = on_failure {
                    callback();
                }
                record_publish("unavailable");
                PublishOutcome::Unavailable
            }
        };

        self.publish_snapshot();
        outcome
    }

    // ------------------------------------------------------------------
    // Unpublish / mute
    // ------------------------------------------------------------------

    async fn unpublish(&mut self, session: Option<SessionId>) -> TeardownOutcome {
        if let Some(reason) = self.stale_reason(session) {
            return TeardownOutcome::Ignored(reason);
        }

        let mut report = CleanupReport::new();
        if let Some(capture) = self.state.capture.take() {
            report = capture.release(self.transport.as_ref()).await;
            info!(
                target: "sc.actor.coordinator",
                failures = report.failures().len(),
                "Unpublished local capture"
            );
            self.publish_snapshot();
        } else if let Some(session) = self
            .state
            .publishing
            .filter(|id| self.fence.is_active(*id))
        {
            debug!(
                target: "sc.actor.coordinator",
                session_id = %session,
                "Unpublish while capturing, capture will be discarded"
            );
            self.state.publish_cancelled = Some(session);
        }

        TeardownOutcome::Completed(report)
    }

    fn set_muted(&mut self, muted: bool) {
        self.state.muted = muted;
        if let Some(capture) = &self.state.capture {
            capture.set_muted(muted);
        }
        debug!(target: "sc.actor.coordinator", muted = muted, "Mute changed");
        self.publish_snapshot();
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Peer(peer_event) => self.handle_peer_event(peer_event),
            TransportEvent::ConnectionStateChanged { previous, current } => {
                debug!(
                    target: "sc.actor.coordinator",
                    previous = %previous,
                    current = %current,
                    "Transport connection state changed"
                );
                self.publish_snapshot();
            }
        }
    }

    fn handle_peer_event(&mut self, event: PeerEvent) {
        if !(self.state.joined || self.state.joining) {
            trace!(
                target: "sc.actor.coordinator",
                peer_id = %event.peer(),
                "Ignoring peer event outside a session"
            );
            return;
        }

        if let PeerEvent::Published { peer, kind } = event {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = transport.subscribe(peer, kind).await {
                    warn!(
                        target: "sc.actor.coordinator",
                        peer_id = %peer,
                        kind = kind.as_str(),
                        error = %e,
                        "Subscribe to remote media failed"
                    );
                }
            });
        }

        if self.state.peers.apply(&event) {
            set_remote_peers(self.state.peers.len());
            self.publish_snapshot();
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// `Some` if a caller naming `session` is not addressing the active session.
    fn stale_reason(&self, session: Option<SessionId>) -> Option<IgnoreReason> {
        let requested = session?;
        if self.fence.is_active(requested) {
            return None;
        }

        let active = self.fence.active();
        warn!(
            target: "sc.actor.coordinator",
            requested = %requested,
            active = ?active.map(SessionId::get),
            "Ignoring request for stale session"
        );
        Some(IgnoreReason::Stale { requested, active })
    }

    async fn shutdown(&mut self) {
        if self.state.joining {
            warn!(
                target: "sc.actor.coordinator",
                "Shutting down with a join in flight, skipping teardown"
            );
            return;
        }

        let report = self.teardown().await;
        if !report.is_clean() {
            warn!(
                target: "sc.actor.coordinator",
                failures = report.failures().len(),
                "Shutdown teardown had failures"
            );
        }
    }

    fn publish_snapshot(&self) {
        let connection = self.transport.connection_state();
        let state = &self.state;

        self.snapshot.send_replace(SessionSnapshot {
            active_session: self.fence.active(),
            joining: state.joining,
            joined: state.joined,
            current_room: state.current_room.clone(),
            phase: ConnectionPhase::derive(
                state.leaving,
                state.joining,
                state.joined,
                state.capture.is_some(),
            ),
            connection,
            local_capture: state.capture.as_ref().map(LocalCapture::kind),
            muted: state.muted,
            remote_peers: state.peers.to_vec(),
        });
    }
}

/// Everything a spawned join needs.
struct JoinTask {
    token: SessionToken,
    membership: RoomMembership,
    app_id: Arc<str>,
    transport: Arc<dyn Transport>,
    sender: mpsc::Sender<CoordinatorMessage>,
    respond_to: oneshot::Sender<Option<SessionId>>,
    started: Instant,
}

async fn run_join(task: JoinTask) {
    let JoinTask {
        token,
        membership,
        app_id,
        transport,
        sender,
        respond_to,
        started,
    } = task;

    let attempt = drive_join(&token, &membership, &app_id, transport.as_ref()).await;

    let message = CoordinatorMessage::JoinSettled {
        token,
        room: membership.room().clone(),
        attempt,
        started,
        respond_to,
    };

    if let Err(mpsc::error::SendError(message)) = sender.send(message).await {
        warn!(
            target: "sc.actor.coordinator",
            "Coordinator gone before join settled"
        );
        if let CoordinatorMessage::JoinSettled {
            token,
            attempt,
            respond_to,
            ..
        } = message
        {
            // Nobody owns this connection any more.
            if matches!(attempt, JoinAttempt::Joined) {
                if let Err(e) = transport.leave().await {
                    warn!(
                        target: "sc.actor.coordinator",
                        session_id = %token.id(),
                        error = %e,
                        "Leave after coordinator shutdown failed"
                    );
                }
            }
            let _ = respond_to.send(None);
        }
    }
}

/// Drive the transport through one join, checking the fence after every
/// suspension point.
async fn drive_join(
    token: &SessionToken,
    membership: &RoomMembership,
    app_id: &str,
    transport: &dyn Transport,
) -> JoinAttempt {
    let connection = transport.connection_state();
    if connection != ConnectionState::Disconnected {
        debug!(
            target: "sc.actor.coordinator",
            session_id = %token.id(),
            connection = %connection,
            "Leaving previous connection before join"
        );
        if let Err(e) = transport.leave().await {
            debug!(
                target: "sc.actor.coordinator",
                session_id = %token.id(),
                error = %e,
                "Pre-join leave failed, ignoring"
            );
        }
    }

    if let Err(superseded) = token.ensure_current("pre_join_cleanup") {
        return JoinAttempt::Superseded(superseded);
    }

    if let Err(e) = transport.set_role(membership.role()).await {
        return JoinAttempt::Failed(e);
    }

    if let Err(superseded) = token.ensure_current("set_role") {
        return JoinAttempt::Superseded(superseded);
    }

    if let Err(e) = transport.join(app_id, membership).await {
        return JoinAttempt::Failed(e);
    }

    if let Err(superseded) = token.ensure_current("post_join") {
        if let Err(e) = transport.leave().await {
            debug!(
                target: "sc.actor.coordinator",
                session_id = %token.id(),
                error = %e,
                "Courtesy leave for stale join failed, ignoring"
            );
        }
        return JoinAttempt::Superseded(superseded);
    }

    JoinAttempt::Joined
}
