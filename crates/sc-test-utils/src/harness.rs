//! Coordinator harness for integration tests.
//!
//! Spawns a real `SessionCoordinator` wired to [`MockTransport`] and
//! [`MockDevices`].

use session_coordinator::actors::{SessionCoordinator, SessionCoordinatorHandle, SessionSnapshot};
use session_coordinator::capture::CaptureDevices;
use session_coordinator::config::Config;
use session_coordinator::fence::SessionId;
use session_coordinator::membership::RoomMembership;
use session_coordinator::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::fixtures::test_config;
use crate::mock_capture::MockDevices;
use crate::mock_transport::MockTransport;

/// Upper bound for [`CoordinatorHarness::wait_for`].
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Running coordinator plus the mocks behind it.
pub struct CoordinatorHarness {
    pub handle: SessionCoordinatorHandle,
    pub transport: Arc<MockTransport>,
    pub devices: Arc<MockDevices>,
    pub cancel_token: CancellationToken,
    pub task: JoinHandle<()>,
}

impl CoordinatorHarness {
    /// Coordinator with a fresh transport and both devices present.
    pub fn start() -> Self {
        Self::start_with(MockTransport::new(), MockDevices::new())
    }

    pub fn start_with(transport: Arc<MockTransport>, devices: Arc<MockDevices>) -> Self {
        Self::start_with_config(&test_config(), transport, devices)
    }

    pub fn start_with_config(
        config: &Config,
        transport: Arc<MockTransport>,
        devices: Arc<MockDevices>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let dyn_devices: Arc<dyn CaptureDevices> = devices.clone();
        let (handle, task) =
            SessionCoordinator::spawn(config, dyn_transport, dyn_devices, cancel_token.clone());

        Self {
            handle,
            transport,
            devices,
            cancel_token,
            task,
        }
    }

    /// Run `join_membership` in the background.
    pub fn spawn_join(&self, membership: RoomMembership) -> JoinHandle<Option<SessionId>> {
        let handle = self.handle.clone();
        tokio::spawn(async move { handle.join_membership(membership).await.unwrap() })
    }

    /// Run `switch_room` in the background.
    pub fn spawn_switch(&self, membership: RoomMembership) -> JoinHandle<Option<SessionId>> {
        let handle = self.handle.clone();
        tokio::spawn(async move { handle.switch_room(membership).await.unwrap() })
    }

    /// Join and wait for completion. Panics if the join did not succeed.
    pub async fn join(&self, membership: RoomMembership) -> SessionId {
        self.handle
            .join_membership(membership)
            .await
            .unwrap()
            .expect("join should succeed")
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.handle.subscribe();
        let snapshot = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate))
            .await
            .expect("timed out waiting for snapshot")
            .expect("coordinator stopped");
        snapshot.clone()
    }

    /// Cancel the coordinator and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        self.task.await.unwrap();
    }
}
